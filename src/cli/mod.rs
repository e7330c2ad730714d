//! CLI module for `run-suite`
//!
//! ## Usage
//!
//! ```text
//! run-suite --root tests/ --tool muac=build/muac --jobs 8 --timeout 30
//! ```
//!
//! ## Modules
//!
//! - `commands` - Suite execution
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.
//!
//! Exit codes: `0` when every test passed (or failed as declared by `XFAIL:`), `1` when any test did not, `2` when
//! the run could not start (bad configuration, fatal unresolved tool, no tests).

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use crate::config::{ConfigOverrides, parse_tool_override};
use crate::version::MUALIT_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// At least one test did not succeed.
    pub const FAILURE: ExitCode = ExitCode(1);
    /// The run could not start or its results could not be written.
    pub const ERROR: ExitCode = ExitCode(2);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create an error that aborts the run (exit code 2).
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::ERROR)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Run the mua compiler conformance suite
#[derive(Parser, Debug)]
#[command(name = "run-suite")]
#[command(version = MUALIT_VERSION)]
#[command(about = "Run the mua compiler conformance suite", long_about = None)]
pub struct Cli {
    /// Suite root directory
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Suite config file (default: <root>/lit.toml when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Bind a tool placeholder to an executable, e.g. `--tool muac=build/muac`
    #[arg(long = "tool", value_name = "NAME=PATH", value_parser = parse_tool_override)]
    pub tools: Vec<(String, PathBuf)>,

    /// Directories searched for tools, in the platform's PATH syntax (repeatable)
    #[arg(long = "search-path", value_name = "DIRS")]
    pub search_path: Vec<PathBuf>,

    /// Directory searched after --search-path
    #[arg(long = "tools-dir", value_name = "DIR")]
    pub tools_dir: Option<PathBuf>,

    /// Test file suffix (repeatable; replaces the configured suffixes)
    #[arg(long = "suffix", value_name = "EXT")]
    pub suffixes: Vec<String>,

    /// Number of tests to run at once
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Wall-clock limit for each RUN: directive
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Wall-clock limit for the whole run
    #[arg(long = "max-time", value_name = "SECONDS")]
    pub max_time: Option<f64>,

    /// Directory for per-test scratch files (default: <root>/Output)
    #[arg(long = "exec-root", value_name = "DIR")]
    pub exec_root: Option<PathBuf>,

    /// Pass an environment variable through to every command (repeatable)
    #[arg(long = "env", value_name = "VAR")]
    pub env: Vec<String>,

    /// Write a JSON report
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Keep running a test's RUN: lines after one exits unexpectedly
    #[arg(long = "no-fail-fast")]
    pub no_fail_fast: bool,

    /// Only run tests whose id contains this substring
    #[arg(short = 'k', long = "filter", value_name = "SUBSTRING")]
    pub filter: Option<String>,

    /// Show failure details for every test, including expected failures
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// The command-line layer of the suite configuration.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            root: self.root.clone(),
            config_file: self.config.clone(),
            tools: self.tools.clone(),
            search_path: self
                .search_path
                .iter()
                .flat_map(|dirs| env::split_paths(dirs.as_os_str()).collect::<Vec<_>>())
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect(),
            tools_dir: self.tools_dir.clone(),
            suffixes: self.suffixes.clone(),
            exec_root: self.exec_root.clone(),
            jobs: self.jobs,
            timeout: self.timeout,
            max_time: self.max_time,
            env: self.env.clone(),
            no_fail_fast: self.no_fail_fast,
            filter: self.filter.clone(),
        }
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match commands::run_suite(&cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["run-suite"]).unwrap();
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(cli.tools.is_empty());
        assert!(!cli.no_fail_fast);
        assert_eq!(cli.jobs, None);
    }

    #[test]
    fn test_cli_parse_tools() {
        let cli = Cli::try_parse_from([
            "run-suite",
            "--root",
            "suite",
            "--tool",
            "muac=build/muac",
            "--tool",
            "%filecheck=/usr/bin/FileCheck",
        ])
        .unwrap();
        assert_eq!(
            cli.tools,
            [
                ("muac".to_string(), PathBuf::from("build/muac")),
                ("filecheck".to_string(), PathBuf::from("/usr/bin/FileCheck")),
            ]
        );
        assert_eq!(cli.overrides().root, PathBuf::from("suite"));
    }

    #[test]
    fn test_cli_rejects_malformed_tool() {
        assert!(Cli::try_parse_from(["run-suite", "--tool", "muac"]).is_err());
        assert!(Cli::try_parse_from(["run-suite", "--tool", "=x"]).is_err());
    }

    #[test]
    fn test_cli_parse_run_options() {
        let cli = Cli::try_parse_from([
            "run-suite",
            "-j",
            "4",
            "--timeout",
            "2.5",
            "--max-time",
            "600",
            "--suffix",
            ".mua",
            "--suffix",
            "muat",
            "--env",
            "HOME",
            "--no-fail-fast",
            "-k",
            "codegen",
            "--report",
            "out.json",
            "-v",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.jobs, Some(4));
        assert_eq!(overrides.timeout, Some(2.5));
        assert_eq!(overrides.max_time, Some(600.0));
        assert_eq!(overrides.suffixes, [".mua", "muat"]);
        assert_eq!(overrides.env, ["HOME"]);
        assert!(overrides.no_fail_fast);
        assert_eq!(overrides.filter.as_deref(), Some("codegen"));
        assert_eq!(cli.report, Some(PathBuf::from("out.json")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_rejects_bad_numbers() {
        assert!(Cli::try_parse_from(["run-suite", "--jobs", "many"]).is_err());
        assert!(Cli::try_parse_from(["run-suite", "--timeout", "soon"]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_search_path_is_split() {
        let cli = Cli::try_parse_from([
            "run-suite",
            "--search-path",
            "/opt/a:/opt/b",
            "--search-path",
            "/opt/c",
        ])
        .unwrap();
        assert_eq!(
            cli.overrides().search_path,
            [PathBuf::from("/opt/a"), PathBuf::from("/opt/b"), PathBuf::from("/opt/c")]
        );
    }
}
