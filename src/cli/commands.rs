//! Command implementations for the CLI
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. The top-level `run()` in `mod.rs` handles exiting.

use std::env;
use std::io::{self, IsTerminal};
use std::sync::Arc;

use super::{Cli, CliError, CliResult, ExitCode};
use crate::config::SuiteConfig;
use crate::harness::{
    ConsoleReporter, JsonReport, ProcessExecutor, ToolRegistry, cancel_pair, run_suite as run_harness, watch_interrupts,
};

/// Load the configuration, run the suite and write the requested reports.
pub fn run_suite(cli: &Cli) -> CliResult<ExitCode> {
    let config = SuiteConfig::load(cli.overrides()).map_err(|e| CliError::fatal(format!("error: {e}")))?;
    tracing::debug!(
        root = %config.root.display(),
        exec_root = %config.exec_root.display(),
        jobs = config.jobs,
        "loaded suite configuration"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::fatal(format!("error: cannot start the async runtime: {e}")))?;
    runtime.block_on(execute(config, cli))
}

async fn execute(config: SuiteConfig, cli: &Cli) -> CliResult<ExitCode> {
    let config = Arc::new(config);
    let registry = ToolRegistry::new(&config);
    let (handle, token) = cancel_pair();
    let watcher = watch_interrupts(handle, config.max_time);

    let color = io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none();
    let mut reporter = ConsoleReporter::new(io::stdout(), color, cli.verbose);
    let outcome = run_harness(
        Arc::clone(&config),
        &registry,
        Arc::new(ProcessExecutor),
        &mut reporter,
        token,
    )
    .await;
    watcher.abort();
    let summary = outcome.map_err(|e| CliError::fatal(format!("error: {e}")))?;

    if let Some(path) = &cli.report {
        JsonReport::from_summary(&summary)
            .write_to(path)
            .map_err(|e| CliError::fatal(format!("error: cannot write report `{}`: {e}", path.display())))?;
        tracing::info!(report = %path.display(), "wrote JSON report");
    }

    if summary.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
