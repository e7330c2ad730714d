//! Suite runner: binds tools, discovers tests, runs them on a bounded pool and collects the results.
//!
//! Every test runs in its own task. A semaphore bounds how many run at once; the directives of one test always run
//! one after another. Finished records go over a channel to the single collector, which owns the
//! [`SuiteSummary`] and drives the reporter.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mualit_core::Verdict;
use mualit_syntax::parse_script;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::cancel::CancelToken;
use super::discovery::{DiscoveredTest, DiscoveryError, discover};
use super::executor::{RunRequest, RunResult, TestExecutor};
use super::registry::{ResolveError, ToolBindings, ToolRegistry};
use super::report::{SuiteSummary, TestRecord, TestReporter};
use super::substitute::{ExpandedCommand, SubstitutionContext, SubstitutionError, expand};
use super::verifier::{Failure, Judgement, RunOutcome, judge};
use crate::config::SuiteConfig;

/// Errors that stop the run before any test executes.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error(transparent)]
    UnresolvedTool(#[from] ResolveError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("no tests discovered under `{}`", .0.display())]
    NoTests(PathBuf),

    #[error("cannot create exec root `{}`: {message}", .path.display())]
    ExecRoot { path: PathBuf, message: String },
}

/// Shared, read-only state handed to every test task.
struct CaseEnv<E> {
    config: Arc<SuiteConfig>,
    bindings: ToolBindings,
    executor: Arc<E>,
    child_env: Vec<(OsString, OsString)>,
    cancel: CancelToken,
}

/// Run the whole suite and return its summary.
///
/// Fails only for problems that make the run meaningless: an unresolvable `fatal` tool, an unreadable suite root,
/// no tests at all, or an exec root that cannot be created.
#[tracing::instrument(skip_all, fields(suite = %config.name, jobs = config.jobs))]
pub async fn run_suite<E>(
    config: Arc<SuiteConfig>,
    registry: &ToolRegistry,
    executor: Arc<E>,
    reporter: &mut dyn TestReporter,
    cancel: CancelToken,
) -> Result<SuiteSummary, SuiteError>
where
    E: TestExecutor + 'static,
{
    let started = Instant::now();
    let bindings = registry.bind()?;
    let tests = discover(&config)?;
    if tests.is_empty() {
        return Err(SuiteError::NoTests(config.root.clone()));
    }
    fs::create_dir_all(&config.exec_root)
        .await
        .map_err(|err| SuiteError::ExecRoot {
            path: config.exec_root.clone(),
            message: err.to_string(),
        })?;

    let total = tests.len();
    let mut summary = SuiteSummary::new(config.name.clone(), total);
    reporter.on_collection_complete(&config.name, total);

    let shared = Arc::new(CaseEnv {
        child_env: child_env(&config, registry),
        config: Arc::clone(&config),
        bindings,
        executor,
        cancel,
    });
    let semaphore = Arc::new(Semaphore::new(config.jobs));
    let (tx, mut rx) = mpsc::channel::<TestRecord>(config.jobs);
    let mut tasks = JoinSet::new();

    for (index, test) in tests.iter().cloned().enumerate() {
        let shared = Arc::clone(&shared);
        let semaphore = Arc::clone(&semaphore);
        let tx = tx.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let record = run_case(index, test, &shared).await;
            if tx.send(record).await.is_err() {
                tracing::debug!("collector is gone; dropping record");
            }
        });
    }
    drop(tx);

    let mut seen = BTreeSet::new();
    while let Some(record) = rx.recv().await {
        seen.insert(record.index);
        reporter.on_test_complete(&record, seen.len(), total);
        summary.record(record);
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            tracing::error!("test task failed: {err}");
        }
    }
    for (index, test) in tests.into_iter().enumerate() {
        if seen.insert(index) {
            let record = TestRecord {
                index,
                id: test.id,
                verdict: Verdict::Error,
                duration: std::time::Duration::ZERO,
                failure: Some(Failure::Setup {
                    message: "test task ended without a result".to_string(),
                }),
            };
            reporter.on_test_complete(&record, seen.len(), total);
            summary.record(record);
        }
    }

    summary.duration = started.elapsed();
    reporter.on_run_complete(&summary);
    Ok(summary)
}

/// Environment for every child: `PATH` from the search path plus the pass-through variables that are set.
pub fn child_env(config: &SuiteConfig, registry: &ToolRegistry) -> Vec<(OsString, OsString)> {
    let mut env = Vec::new();
    if let Some(path) = registry.child_path() {
        env.push((OsString::from("PATH"), path));
    }
    let mut names: Vec<&str> = config.env_passthrough.iter().map(String::as_str).collect();
    names.sort_unstable();
    names.dedup();
    for name in names.into_iter().filter(|name| *name != "PATH") {
        if let Some(value) = std::env::var_os(name) {
            env.push((OsString::from(name), value));
        }
    }
    env
}

#[tracing::instrument(skip_all, fields(id = %test.id))]
async fn run_case<E: TestExecutor>(index: usize, test: DiscoveredTest, shared: &CaseEnv<E>) -> TestRecord {
    let started = Instant::now();
    let judgement = evaluate(&test, shared).await;
    tracing::debug!(verdict = %judgement.verdict, "finished");
    TestRecord {
        index,
        id: test.id,
        verdict: judgement.verdict,
        duration: started.elapsed(),
        failure: judgement.failure,
    }
}

async fn evaluate<E: TestExecutor>(test: &DiscoveredTest, shared: &CaseEnv<E>) -> Judgement {
    let config = &shared.config;
    let source = match fs::read_to_string(&test.path).await {
        Ok(source) => source,
        Err(err) => return setup_error(format!("cannot read `{}`: {err}", test.path.display())),
    };
    let script = match parse_script(&test.id, &source, &config.parse) {
        Ok(script) => script,
        Err(err) => {
            return Judgement::new(
                Verdict::Error,
                Failure::MalformedDirective {
                    line: err.line,
                    message: err.kind.to_string(),
                    rendered: err.render(),
                },
            );
        }
    };
    let xfail = script.xfail.is_some();
    if script.run.is_empty() {
        return judge(&[], &script.expect, xfail);
    }

    let ctx = SubstitutionContext::for_test(&test.path, &test.id, &config.exec_root);
    let mut commands = Vec::with_capacity(script.run.len());
    for directive in &script.run {
        match expand(&directive.command, &shared.bindings, &ctx) {
            Ok(command) => commands.push(command),
            Err(err) => {
                let verdict = match err {
                    SubstitutionError::UnresolvedTool { .. } => Verdict::UnresolvedTool,
                    _ => Verdict::Error,
                };
                return Judgement::new(
                    verdict,
                    Failure::Substitution {
                        run: directive.index,
                        line: directive.line,
                        message: err.to_string(),
                    },
                );
            }
        }
    }

    if let Err(err) = prepare_scratch(&ctx).await {
        return setup_error(format!("cannot prepare scratch space for `{}`: {err}", test.id));
    }

    let mut outcomes = Vec::with_capacity(commands.len());
    for (directive, command) in script.run.iter().zip(&commands) {
        let result = run_directive(command, &ctx.source_dir, shared).await;
        let stop = result.interrupted
            || result.timed_out
            || result.launch_error.is_some()
            || (config.fail_fast && result.exited_zero() == command.expect_failure);
        outcomes.push(RunOutcome {
            index: directive.index,
            line: directive.line,
            command: command.to_string(),
            expect_failure: command.expect_failure,
            captures_stdout: command.stdout.is_none(),
            captures_stderr: command.stderr.is_none() && !command.merge_stderr,
            result,
        });
        if stop {
            break;
        }
    }
    judge(&outcomes, &script.expect, xfail)
}

async fn run_directive<E: TestExecutor>(command: &ExpandedCommand, cwd: &Path, shared: &CaseEnv<E>) -> RunResult {
    if shared.cancel.is_cancelled() {
        return RunResult::not_started();
    }
    tracing::debug!(%command, "running");
    shared
        .executor
        .run(RunRequest {
            command,
            cwd,
            env: &shared.child_env,
            timeout: shared.config.timeout,
            kill_grace: shared.config.kill_grace,
            cancel: shared.cancel.clone(),
        })
        .await
}

/// Start every test with an empty `%T` and no stale `%t`.
async fn prepare_scratch(ctx: &SubstitutionContext) -> io::Result<()> {
    match fs::remove_dir_all(&ctx.scratch_dir).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
        _ => {}
    }
    fs::create_dir_all(&ctx.scratch_dir).await?;
    match fs::remove_file(&ctx.scratch_file).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
        _ => {}
    }
    Ok(())
}

fn setup_error(message: String) -> Judgement {
    Judgement::new(Verdict::Error, Failure::Setup { message })
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Mutex;

    use super::*;
    use crate::config::{ToolSpec, UnresolvedPolicy};
    use crate::harness::cancel::cancel_pair;
    use crate::harness::report::NullReporter;

    /// Echoes its arguments instead of spawning anything. `--fail` exits 1, `--hang` times out.
    #[derive(Default)]
    struct EchoExecutor {
        calls: Mutex<Vec<String>>,
    }

    impl EchoExecutor {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TestExecutor for EchoExecutor {
        async fn run(&self, request: RunRequest<'_>) -> RunResult {
            let command = request.command;
            self.calls.lock().unwrap().push(command.args.join(" "));
            let mut result = RunResult {
                exit_code: Some(0),
                stdout: format!("{}\n", command.args.join(" ")).into_bytes(),
                ..RunResult::default()
            };
            if command.args.iter().any(|a| a == "--fail") {
                result.exit_code = Some(1);
                result.stderr = b"error: requested failure\n".to_vec();
            }
            if command.args.iter().any(|a| a == "--hang") {
                result.exit_code = None;
                result.timed_out = true;
            }
            result
        }
    }

    struct Suite {
        _dir: tempfile::TempDir,
        config: SuiteConfig,
    }

    impl Suite {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (name, body) in files {
                let path = dir.path().join(name);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, body).unwrap();
            }
            let mut config = SuiteConfig::with_defaults(dir.path()).unwrap();
            config.jobs = 2;
            Self { _dir: dir, config }
        }

        fn registry(&self, muac: Option<&str>, policy: UnresolvedPolicy) -> ToolRegistry {
            let overrides: BTreeMap<String, PathBuf> = muac
                .map(|path| ("muac".to_string(), PathBuf::from(path)))
                .into_iter()
                .collect();
            ToolRegistry::from_parts(vec![ToolSpec::new("muac", "muac", policy)], overrides, Vec::new())
        }

        async fn run(&self, executor: Arc<EchoExecutor>, cancel: CancelToken) -> Result<SuiteSummary, SuiteError> {
            let registry = self.registry(Some("/bin/sh"), UnresolvedPolicy::Fatal);
            let config = Arc::new(self.config.clone());
            run_suite(config, &registry, executor, &mut NullReporter, cancel).await
        }
    }

    fn verdicts(summary: &SuiteSummary) -> Vec<(&str, Verdict)> {
        summary.records.iter().map(|r| (r.id.as_str(), r.verdict)).collect()
    }

    #[tokio::test]
    async fn test_runs_suite_in_discovery_order() {
        let suite = Suite::new(&[
            ("b.mua", "-- RUN: %muac hello\n-- CHECK: hello\n"),
            ("a.mua", "-- RUN: %muac world\n-- CHECK: nothing\n"),
            ("c.mua", "-- RUN: not %muac --fail\n-- CHECK-NOT: panic\n"),
        ]);
        let summary = suite.run(Arc::default(), CancelToken::never()).await.unwrap();
        assert_eq!(
            verdicts(&summary),
            [("a.mua", Verdict::Fail), ("b.mua", Verdict::Pass), ("c.mua", Verdict::Pass)]
        );
        assert!(!summary.all_succeeded());
    }

    #[tokio::test]
    async fn test_builtin_placeholders_are_substituted() {
        let suite = Suite::new(&[("dir/t.mua", "-- RUN: %muac %s %t %%\n")]);
        let executor = Arc::new(EchoExecutor::default());
        suite.run(Arc::clone(&executor), CancelToken::never()).await.unwrap();
        let root = &suite.config.root;
        let expected = format!(
            "{} {} %",
            root.join("dir").join("t.mua").display(),
            root.join("Output").join("dir%2Ft.mua.tmp").display()
        );
        assert_eq!(executor.calls(), [expected]);
        assert!(root.join("Output").join("dir%2Ft.mua.dir").is_dir());
    }

    #[tokio::test]
    async fn test_scratch_space_is_reset_before_running() {
        let suite = Suite::new(&[("t.mua", "-- RUN: %muac %T\n")]);
        let output = suite.config.root.join("Output");
        fs::create_dir_all(output.join("t.mua.dir")).unwrap();
        fs::write(output.join("t.mua.dir").join("stale"), "old").unwrap();
        fs::write(output.join("t.mua.tmp"), "old").unwrap();

        let summary = suite.run(Arc::default(), CancelToken::never()).await.unwrap();
        assert_eq!(summary.records[0].verdict, Verdict::Pass);
        assert!(output.join("t.mua.dir").is_dir());
        assert!(!output.join("t.mua.dir").join("stale").exists());
        assert!(!output.join("t.mua.tmp").exists());
    }

    #[tokio::test]
    async fn test_unknown_placeholder_never_spawns() {
        let suite = Suite::new(&[("t.mua", "-- RUN: %muac ok\n-- RUN: %muac %bogus\n")]);
        let executor = Arc::new(EchoExecutor::default());
        let summary = suite.run(Arc::clone(&executor), CancelToken::never()).await.unwrap();
        assert_eq!(summary.records[0].verdict, Verdict::Error);
        assert!(matches!(summary.records[0].failure, Some(Failure::Substitution { run: 1, line: 2, .. })));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_tool_with_warn_policy() {
        let suite = Suite::new(&[("uses.mua", "-- RUN: %muac x\n"), ("plain.mua", "-- RUN: true\n")]);
        let registry = suite.registry(None, UnresolvedPolicy::Warn);
        let executor = Arc::new(EchoExecutor::default());
        let config = Arc::new(suite.config.clone());
        let summary = run_suite(config, &registry, Arc::clone(&executor), &mut NullReporter, CancelToken::never())
            .await
            .unwrap();
        assert_eq!(
            verdicts(&summary),
            [("plain.mua", Verdict::Pass), ("uses.mua", Verdict::UnresolvedTool)]
        );
        assert_eq!(executor.calls(), [""]);
    }

    #[tokio::test]
    async fn test_fatal_unresolved_tool_aborts_run() {
        let suite = Suite::new(&[("t.mua", "-- RUN: %muac x\n")]);
        let registry = suite.registry(None, UnresolvedPolicy::Fatal);
        let config = Arc::new(suite.config.clone());
        let executor = Arc::new(EchoExecutor::default());
        let err = run_suite(config, &registry, executor, &mut NullReporter, CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, SuiteError::UnresolvedTool(_)), "{err}");
    }

    #[tokio::test]
    async fn test_fail_fast_stops_later_directives() {
        let body = "-- RUN: %muac --fail\n-- RUN: %muac second\n";
        let suite = Suite::new(&[("t.mua", body)]);
        let executor = Arc::new(EchoExecutor::default());
        let summary = suite.run(Arc::clone(&executor), CancelToken::never()).await.unwrap();
        assert_eq!(summary.records[0].verdict, Verdict::Fail);
        assert_eq!(executor.calls(), ["--fail"]);

        let mut suite = Suite::new(&[("t.mua", body)]);
        suite.config.fail_fast = false;
        let executor = Arc::new(EchoExecutor::default());
        let summary = suite.run(Arc::clone(&executor), CancelToken::never()).await.unwrap();
        assert!(matches!(summary.records[0].failure, Some(Failure::ExecutionFailure { run: 0, .. })));
        assert_eq!(executor.calls(), ["--fail", "second"]);
    }

    #[tokio::test]
    async fn test_timeout_verdict_stops_test() {
        let suite = Suite::new(&[("t.mua", "-- RUN: %muac --hang\n-- RUN: %muac after\n")]);
        let executor = Arc::new(EchoExecutor::default());
        let summary = suite.run(Arc::clone(&executor), CancelToken::never()).await.unwrap();
        assert_eq!(summary.records[0].verdict, Verdict::Timeout);
        assert_eq!(executor.calls(), ["--hang"]);
    }

    #[tokio::test]
    async fn test_malformed_directive_is_error() {
        let suite = Suite::new(&[("t.mua", "-- RUN: %muac x\n-- CHECK-NEXT: y\n")]);
        let executor = Arc::new(EchoExecutor::default());
        let summary = suite.run(Arc::clone(&executor), CancelToken::never()).await.unwrap();
        assert_eq!(summary.records[0].verdict, Verdict::Error);
        assert!(matches!(summary.records[0].failure, Some(Failure::MalformedDirective { line: 2, .. })));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_interrupted() {
        let suite = Suite::new(&[("a.mua", "-- RUN: %muac a\n"), ("b.mua", "-- RUN: %muac b\n")]);
        let (handle, token) = cancel_pair();
        handle.cancel();
        let executor = Arc::new(EchoExecutor::default());
        let summary = suite.run(Arc::clone(&executor), token).await.unwrap();
        assert!(summary.records.iter().all(|r| r.verdict == Verdict::Error));
        assert!(matches!(summary.records[0].failure, Some(Failure::Interrupted { .. })));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_suite_is_an_error() {
        let suite = Suite::new(&[("README.txt", "nothing here\n")]);
        let err = suite.run(Arc::default(), CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, SuiteError::NoTests(_)));
    }

    #[test]
    fn test_child_env_contains_path_and_passthrough() {
        let suite = Suite::new(&[]);
        let mut config = suite.config.clone();
        config.env_passthrough = vec!["PATH".to_string(), "MUALIT_SURELY_UNSET_VAR".to_string()];
        let registry = ToolRegistry::from_parts(Vec::new(), BTreeMap::new(), vec![PathBuf::from("/opt/mua/bin")]);
        let env = child_env(&config, &registry);
        assert_eq!(env, [(OsString::from("PATH"), OsString::from("/opt/mua/bin"))]);
    }
}
