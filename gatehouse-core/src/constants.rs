//! Constants for the GATEHOUSE gateway
//!
//! Hard ceilings and defaults shared by validation, SQL generation and the
//! API layer. Centralizing them keeps the numbers the validator enforces and
//! the numbers the generator applies in one place.

// ============================================================================
// PAGINATION
// ============================================================================

/// Row limit applied when a select does not specify one.
pub const DEFAULT_LIMIT: u32 = 100;

/// Hard ceiling on `limit`.
pub const MAX_LIMIT: u32 = 1000;

/// Hard ceiling on `offset`; deep offsets force expensive scans.
pub const MAX_OFFSET: u32 = 100_000;

// ============================================================================
// MUTATIONS
// ============================================================================

/// Implicit row-impact cap for update/delete issued with a public key.
pub const DEFAULT_PUBLIC_MAX_ROWS: u32 = 50;

/// Largest `maxRows` a caller may request explicitly.
pub const MAX_ROW_IMPACT: u32 = 10_000;

/// Maximum rows accepted by a single batch insert.
pub const MAX_INSERT_ROWS: usize = 1000;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// PostgreSQL truncates identifiers beyond this length (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

// ============================================================================
// ERRORS
// ============================================================================

/// Database error detail is truncated to this many characters before it is
/// returned to a client.
pub const MAX_ERROR_DETAIL_CHARS: usize = 200;

// ============================================================================
// SCOPES
// ============================================================================

/// Scope required for insert/update/delete.
pub const WRITE_SCOPE: &str = "write";

/// Scope granting every permission.
pub const ALL_SCOPES: &str = "*";
