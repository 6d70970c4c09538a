//! Generate an API key for provisioning.
//!
//! Prints the raw key once, with the prefix and hash to store in
//! `gateway_api_keys`. The raw key is not recoverable afterwards.
//!
//! Usage: `mint-key [public|server|admin]` (default: server)

use gatehouse_api::mint_api_key;
use gatehouse_core::KeyClass;
use secrecy::ExposeSecret;

fn main() {
    let arg = std::env::args().nth(1).unwrap_or_else(|| "server".to_string());
    let class: KeyClass = match arg.parse() {
        Ok(class) => class,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let minted = mint_api_key(class);
    println!("class:  {}", minted.key_class);
    println!("key:    {}", minted.raw_key.expose_secret());
    println!("prefix: {}", minted.key_prefix);
    println!("hash:   {}", minted.key_hash);
}
