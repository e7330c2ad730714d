//! Harness version information.
//!
//! ## Notes
//!
//! - The value is taken from Cargo metadata (`CARGO_PKG_VERSION`) at compile time.
//! - The CLI `--version` flag and the JSON report header both read this constant.

/// The mualit version string (for example, `0.1.0`).
pub const MUALIT_VERSION: &str = env!("CARGO_PKG_VERSION");
