//! The test harness.
//!
//! ## Pipeline
//!
//! ```text
//! discovery -> parse (mualit_syntax) -> substitute -> executor -> verifier -> report
//! ```
//!
//! - [`registry`] resolves tool placeholders once per run.
//! - [`discovery`] finds test files under the suite root.
//! - [`substitute`] expands `%` placeholders in `RUN:` command templates.
//! - [`executor`] runs one expanded command under a timeout.
//! - [`verifier`] turns run results and expectations into a verdict.
//! - [`runner`] drives all of the above on a bounded worker pool.
//! - [`report`] prints and serializes the results.

pub mod cancel;
pub mod discovery;
pub mod executor;
pub mod registry;
pub mod report;
pub mod runner;
pub mod substitute;
pub mod verifier;

pub use cancel::{CancelHandle, CancelToken, cancel_pair, watch_interrupts};
pub use discovery::{DiscoveredTest, discover};
pub use executor::{ProcessExecutor, RunRequest, RunResult, TestExecutor};
pub use registry::{ResolveError, ToolBinding, ToolBindings, ToolRegistry};
pub use report::{ConsoleReporter, JsonReport, NullReporter, SuiteSummary, TestRecord, TestReporter};
pub use runner::{SuiteError, run_suite};
pub use verifier::{Failure, Judgement, judge};
