//! Background Jobs for the Gatehouse API
//!
//! - `sweeper`: evicts idle rate-limit windows, idle IP throttles and expired
//!   schema metadata
//!
//! # Usage
//!
//! ```ignore
//! use gatehouse_api::jobs::{sweeper_task, SweeperConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(sweeper_task(targets, SweeperConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod sweeper;

pub use sweeper::{sweeper_task, SweepTargets, SweeperConfig, SweeperMetrics, SweeperSnapshot};
