//! Executor: runs one expanded `RUN:` command as an isolated child process.
//!
//! The child gets a cleared environment with only the constructed `PATH` and the configured pass-through variables.
//! stdin is `/dev/null` unless redirected. stdout and stderr are captured separately, except under `2>&1`, where both
//! file descriptors share one pipe and the captured stdout holds the output in the order it was written. On Unix the
//! child leads its own process group so that a timeout or an interrupt can take down everything it started.
//!
//! The executor records the exit status; it never decides whether that status is acceptable.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::cancel::CancelToken;
use super::substitute::ExpandedCommand;

/// Everything needed to run one command.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub command: &'a ExpandedCommand,
    pub cwd: &'a Path,
    /// Complete child environment.
    pub env: &'a [(OsString, OsString)],
    pub timeout: Duration,
    /// Delay between SIGTERM and SIGKILL after cancellation.
    pub kill_grace: Duration,
    pub cancel: CancelToken,
}

/// What happened when a command ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// `None` when the process was killed by a signal or never started.
    pub exit_code: Option<i32>,
    /// Terminating signal, on Unix.
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub timed_out: bool,
    /// The run was cancelled while this command was running or before it started.
    pub interrupted: bool,
    /// The process could not be started (missing program, unreadable redirect, ...).
    pub launch_error: Option<String>,
}

impl RunResult {
    pub fn launch_failure(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            launch_error: Some(message.into()),
            duration,
            ..Self::default()
        }
    }

    /// Placeholder result for a command that never started because the run was cancelled.
    pub fn not_started() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }

    pub fn exited_zero(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Human-readable exit status (`exit code 1`, `killed by signal 9`, ...).
    pub fn status_text(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(signal)) => format!("killed by signal {signal}"),
            (None, None) if self.launch_error.is_some() => "not started".to_string(),
            (None, None) => "no exit status".to_string(),
        }
    }
}

/// Runs commands. Implemented by [`ProcessExecutor`]; tests can supply scripted implementations.
pub trait TestExecutor: Send + Sync {
    fn run(&self, request: RunRequest<'_>) -> impl Future<Output = RunResult> + Send;
}

/// Spawns real processes on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl TestExecutor for ProcessExecutor {
    async fn run(&self, request: RunRequest<'_>) -> RunResult {
        run_process(request).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Term,
    Kill,
}

impl Signal {
    fn name(self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
        }
    }
}

#[tracing::instrument(skip_all, fields(program = %request.command.program))]
async fn run_process(request: RunRequest<'_>) -> RunResult {
    let started = Instant::now();
    let command = request.command;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(request.cwd)
        .env_clear()
        .envs(request.env.iter().map(|(key, value)| (key, value)))
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let merged = match wire_stdio(&mut cmd, command) {
        Ok(merged) => merged,
        Err(err) => {
            return RunResult::launch_failure(format!("cannot set up redirection: {err}"), started.elapsed());
        }
    };
    let spawned = cmd.spawn();
    // The command still owns the parent's copies of the child's stdio; the merged pipe only sees EOF once they close.
    drop(cmd);
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            return RunResult::launch_failure(
                format!("failed to launch `{}`: {err}", command.program),
                started.elapsed(),
            );
        }
    };
    let pid = child.id();
    tracing::trace!(pid, "spawned");

    let mut readers = [
        match merged {
            Some(pipe) => Some(read_merged(pipe)),
            None => child.stdout.take().map(|pipe| tokio::spawn(read_all(pipe))),
        },
        child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe))),
    ];

    let deadline = started + request.timeout;
    let mut cancel = request.cancel.clone();
    let mut result = RunResult::default();

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        () = tokio::time::sleep_until(deadline) => None,
        () = cancel.cancelled() => {
            result.interrupted = true;
            None
        }
    };
    let status = match waited {
        Some(status) => status,
        None if result.interrupted => terminate(pid, &mut child, request.kill_grace).await,
        None => {
            result.timed_out = true;
            tracing::debug!(pid, timeout = ?request.timeout, "timed out; killing process group");
            signal_group(pid, &mut child, Signal::Kill).await;
            child.wait().await
        }
    };
    match status {
        Ok(status) => record_status(&mut result, status),
        Err(err) => tracing::warn!("failed to wait for `{}`: {err}", command.program),
    }

    // Pipes stay open while anything in the group holds them; bound the wait by the same deadline.
    let mut outputs: [Vec<u8>; 2] = Default::default();
    for (slot, reader) in readers.iter_mut().enumerate() {
        let Some(handle) = reader else {
            continue;
        };
        let until = if result.timed_out || result.interrupted {
            Instant::now() + request.kill_grace
        } else {
            deadline
        };
        let mut bytes = await_reader(handle, until).await;
        if bytes.is_none() && !result.timed_out && !result.interrupted {
            result.timed_out = true;
            tracing::debug!(pid, "output still open at the deadline; killing process group");
            signal_group(pid, &mut child, Signal::Kill).await;
            bytes = await_reader(handle, Instant::now() + request.kill_grace).await;
        }
        match bytes {
            Some(bytes) => outputs[slot] = bytes,
            None => handle.abort(),
        }
    }
    let [stdout, stderr] = outputs;
    result.stdout = stdout;
    result.stderr = stderr;
    result.duration = started.elapsed();
    result
}

/// Configure the child's stdio. Returns the read end of the shared pipe when stdout and stderr are captured merged.
fn wire_stdio(cmd: &mut Command, command: &ExpandedCommand) -> io::Result<Option<MergedReader>> {
    let stdin = match &command.stdin {
        Some(path) => Stdio::from(File::open(path)?),
        None => Stdio::null(),
    };
    cmd.stdin(stdin);

    let stdout_file = match &command.stdout {
        Some(target) => Some(
            OpenOptions::new()
                .create(true)
                .write(true)
                .append(target.append)
                .truncate(!target.append)
                .open(&target.path)?,
        ),
        None => None,
    };
    match (&command.stderr, stdout_file) {
        (Some(path), stdout_file) => {
            cmd.stderr(File::create(path)?);
            cmd.stdout(stdout_file.map_or_else(Stdio::piped, Stdio::from));
        }
        (None, Some(file)) if command.merge_stderr => {
            cmd.stderr(file.try_clone()?);
            cmd.stdout(file);
        }
        (None, None) if command.merge_stderr => {
            let (reader, writer) = io::pipe()?;
            cmd.stderr(writer.try_clone()?);
            cmd.stdout(writer);
            return merged_reader(reader).map(Some);
        }
        (None, stdout_file) => {
            cmd.stderr(Stdio::piped());
            cmd.stdout(stdout_file.map_or_else(Stdio::piped, Stdio::from));
        }
    }
    Ok(None)
}

#[cfg(unix)]
type MergedReader = tokio::net::unix::pipe::Receiver;
#[cfg(not(unix))]
type MergedReader = io::PipeReader;

#[cfg(unix)]
fn merged_reader(reader: io::PipeReader) -> io::Result<MergedReader> {
    tokio::net::unix::pipe::Receiver::from_owned_fd(std::os::fd::OwnedFd::from(reader))
}

#[cfg(not(unix))]
fn merged_reader(reader: io::PipeReader) -> io::Result<MergedReader> {
    Ok(reader)
}

#[cfg(unix)]
fn read_merged(pipe: MergedReader) -> JoinHandle<Vec<u8>> {
    tokio::spawn(read_all(pipe))
}

#[cfg(not(unix))]
fn read_merged(mut pipe: MergedReader) -> JoinHandle<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let mut buf = Vec::new();
        if let Err(err) = io::Read::read_to_end(&mut pipe, &mut buf) {
            tracing::debug!("error reading child output: {err}");
        }
        buf
    })
}

fn record_status(result: &mut RunResult, status: ExitStatus) {
    result.exit_code = status.code();
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        result.signal = status.signal();
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(err) = pipe.read_to_end(&mut buf).await {
        tracing::debug!("error reading child output: {err}");
    }
    buf
}

/// Wait for a pipe reader; `None` if the pipe is still open at `until`.
async fn await_reader(handle: &mut JoinHandle<Vec<u8>>, until: Instant) -> Option<Vec<u8>> {
    match tokio::time::timeout_at(until, handle).await {
        Ok(Ok(bytes)) => Some(bytes),
        Ok(Err(err)) => {
            tracing::debug!("output reader failed: {err}");
            Some(Vec::new())
        }
        Err(_) => None,
    }
}

/// SIGTERM the group, then SIGKILL it if the leader is still alive after `grace`.
async fn terminate(pid: Option<u32>, child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    signal_group(pid, child, Signal::Term).await;
    let status = match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            signal_group(pid, child, Signal::Kill).await;
            child.wait().await
        }
    };
    // Stragglers that ignored SIGTERM after the leader exited.
    signal_group(pid, child, Signal::Kill).await;
    status
}

/// Signal the child's whole process group, falling back to killing only the child.
async fn signal_group(pid: Option<u32>, child: &mut Child, signal: Signal) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            let sent = Command::new("sh")
                .arg("-c")
                .arg(format!("kill -{} -{pid}", signal.name()))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match sent {
                Ok(status) if status.success() => return,
                Ok(status) => tracing::trace!(pid, %status, "group signal not delivered"),
                Err(err) => tracing::debug!(pid, "cannot signal process group: {err}"),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if signal == Signal::Kill || cfg!(not(unix)) {
        if let Err(err) = child.start_kill() {
            tracing::trace!("kill failed: {err}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::harness::cancel::cancel_pair;
    use crate::harness::substitute::OutputTarget;

    fn sh(script: &str) -> ExpandedCommand {
        ExpandedCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            stdin: None,
            stdout: None,
            stderr: None,
            merge_stderr: false,
            expect_failure: false,
        }
    }

    fn env() -> Vec<(OsString, OsString)> {
        vec![(OsString::from("PATH"), OsString::from("/usr/bin:/bin"))]
    }

    async fn run(command: &ExpandedCommand, cwd: &Path, timeout: Duration) -> RunResult {
        let env = env();
        ProcessExecutor
            .run(RunRequest {
                command,
                cwd,
                env: &env,
                timeout,
                kill_grace: Duration::from_secs(1),
                cancel: CancelToken::never(),
            })
            .await
    }

    #[tokio::test]
    async fn test_captures_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(&sh("echo out; echo err >&2; exit 3"), dir.path(), Duration::from_secs(10)).await;
        assert_eq!(result.stdout, b"out\n");
        assert_eq!(result.stderr, b"err\n");
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.timed_out && !result.interrupted);
        assert_eq!(result.status_text(), "exit code 3");
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(&sh("echo \"[$HOME][$PATH]\""), dir.path(), Duration::from_secs(10)).await;
        assert_eq!(String::from_utf8_lossy(&result.stdout), "[][/usr/bin:/bin]\n");
    }

    #[tokio::test]
    async fn test_runs_in_cwd_with_redirects() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.txt"), "hello\n").unwrap();
        let mut command = sh("cat; pwd >&2");
        command.stdin = Some(dir.path().join("in.txt"));
        command.stdout = Some(OutputTarget {
            path: dir.path().join("out.txt"),
            append: false,
        });
        command.merge_stderr = true;
        let result = run(&command, dir.path(), Duration::from_secs(10)).await;
        assert!(result.exited_zero());
        assert!(result.stdout.is_empty());
        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        let cwd = PathBuf::from(written.lines().nth(1).unwrap());
        assert_eq!(written.lines().next(), Some("hello"));
        assert_eq!(cwd.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_merged_streams_keep_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut command = sh("echo 'warning: w' >&2; echo 'define main'; echo 'note: n' >&2");
        command.merge_stderr = true;
        let result = run(&command, dir.path(), Duration::from_secs(10)).await;
        assert!(result.exited_zero());
        assert_eq!(String::from_utf8_lossy(&result.stdout), "warning: w\ndefine main\nnote: n\n");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut command = sh("true");
        command.program = "/definitely/not/a/program".to_string();
        let result = run(&command, dir.path(), Duration::from_secs(10)).await;
        assert!(result.launch_error.is_some());
        assert_eq!(result.exit_code, None);
        assert_eq!(result.status_text(), "not started");
    }

    #[tokio::test]
    async fn test_timeout_kills_the_process_tree() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let script = format!("(sleep 2; touch '{}') & sleep 5", marker.display());
        let result = run(&sh(&script), dir.path(), Duration::from_millis(300)).await;
        assert!(result.timed_out);
        assert!(result.duration < Duration::from_secs(2), "{:?}", result.duration);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists(), "background child outlived the timeout");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, token) = cancel_pair();
        let command = sh("sleep 5");
        let env = env();
        let running = ProcessExecutor.run(RunRequest {
            command: &command,
            cwd: dir.path(),
            env: &env,
            timeout: Duration::from_secs(30),
            kill_grace: Duration::from_millis(500),
            cancel: token,
        });
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(running, canceller);
        assert!(result.interrupted);
        assert!(!result.timed_out);
        assert!(result.duration < Duration::from_secs(3), "{:?}", result.duration);
    }
}
