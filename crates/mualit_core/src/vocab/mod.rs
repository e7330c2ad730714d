//! Harness vocabulary registries.
//!
//! Callers work with stable ids (`DirectiveId`, `CheckTagId`, `PlaceholderId`) and look up spellings via these
//! tables instead of comparing strings inline.
//!
//! ## Examples
//! ```rust
//! use mualit_core::vocab::directives::{self, DirectiveId};
//! use mualit_core::vocab::placeholders::{self, PlaceholderId};
//!
//! assert_eq!(directives::from_str("RUN"), Some(DirectiveId::Run));
//! assert_eq!(placeholders::from_str("p"), Some(PlaceholderId::SourceDir));
//! assert_eq!(placeholders::as_str(PlaceholderId::Scratch), "t");
//! ```

pub mod check_tags;
pub mod directives;
pub mod placeholders;
pub mod registry;
