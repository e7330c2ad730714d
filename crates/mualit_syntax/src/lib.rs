//! Directive syntax for mualit test files: `RUN:` command templates, `CHECK` expectations and `XFAIL:` markers.
//!
//! This crate is "syntax-only": it does not resolve tools, expand placeholders, touch the filesystem or run
//! anything. It turns the text of one test file into an ordered [`TestScript`].
//!
//! ## Notes
//! - Marker and tag spellings come from `mualit_core::vocab` registries.
//! - Parsing is line oriented and tolerant: lines without a recognized marker are test source and are ignored.
//!
//! ## Examples
//! ```rust
//! use mualit_syntax::{parse_script, ParseOptions};
//!
//! let script = parse_script(
//!     "add.mua",
//!     "-- RUN: %muac %s --emit=ast\n-- CHECK: BinaryExpr\nreturn 1 + 2\n",
//!     &ParseOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(script.run.len(), 1);
//! assert_eq!(script.expect.len(), 1);
//! ```

pub mod command;
pub mod errors;
pub mod script;

pub use command::{CommandError, CommandTemplate, OutputRedirect};
pub use errors::{DirectiveErrorKind, ParseError};
pub use script::{
    CheckKind, ExpectDirective, Matcher, ParseOptions, RunDirective, Stream, TestScript, XfailDirective, parse_script,
};
