#![forbid(unsafe_code)]
//! mualit: conformance-test harness for the `muac` compiler.
//!
//! A suite is a directory tree of `.mua` files. Each file carries its own test script in comments:
//!
//! ```text
//! -- RUN: %muac --emit-ir %s
//! -- CHECK: define i32 @main()
//! -- CHECK-NEXT: ret i32 0
//! ```
//!
//! The harness discovers the files, expands the `%` placeholders, runs every `RUN:` command with a timeout and
//! matches the captured output against the `CHECK` expectations.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod cli;
pub mod config;
pub mod harness;
pub mod version;

pub use config::{ConfigError, ConfigOverrides, SuiteConfig};
pub use harness::{SuiteError, SuiteSummary, run_suite};
pub use mualit_core::Verdict;
