//! Provide the canonical vocabulary and outcome types shared by the mualit harness crates.
//!
//! Both the directive parser (`mualit_syntax`) and the harness itself need to agree on what a `RUN:` line is,
//! which `CHECK` tags exist, which `%` placeholders are builtin, and how a test outcome is named. Keeping those
//! tables here avoids stringly-typed comparisons scattered across the workspace.
//!
//! ## Notes
//!
//! - This is a “vocabulary” crate: **no IO**, no global state, no dependencies.
//! - Registries are `const` tables keyed by stable ids; see [`vocab`].

pub mod verdict;
pub mod vocab;

pub use verdict::Verdict;
