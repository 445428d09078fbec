//! Timeout and lifecycle supervision of a launched solver.
//!
//! The supervisor feeds the continuation token, drains both output streams on
//! background threads, and polls the child against a wall-clock deadline. On
//! expiry the whole process tree is terminated through a [`TreeTerminator`],
//! chosen per platform, so the polling logic stays platform-agnostic.
use crate::deck::decode_deck_bytes;
use crate::launcher::{LaunchPlan, LaunchedProcess};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Exit code recorded when the deadline expired and the tree was killed.
pub const TIMEOUT_EXIT_CODE: i32 = -9;
/// Exit code recorded when the process could not be run or waited on.
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long to wait for stream readers once the process is gone.
const STREAM_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Why the solver process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    Completed,
    TimedOut,
    SpawnFailed,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationReason::Completed => "completed",
            TerminationReason::TimedOut => "timed-out",
            TerminationReason::SpawnFailed => "spawn-failed",
        };
        f.write_str(label)
    }
}

/// What actually ran and how it ended.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessExecution {
    pub command_line: String,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub termination: TerminationReason,
}

impl ProcessExecution {
    /// Execution record for a process that never started.
    pub fn spawn_failed(plan: &LaunchPlan, error: &anyhow::Error) -> Self {
        Self::not_started(
            plan.command_line.clone(),
            plan.working_dir.clone(),
            format!("failed to run solver: {error:#}"),
        )
    }

    /// Record for a job that stopped before its process could run.
    pub fn not_started(command_line: String, working_dir: PathBuf, message: String) -> Self {
        let now = Local::now();
        Self {
            command_line,
            working_dir,
            started_at: now,
            finished_at: now,
            stdout: String::new(),
            stderr: message,
            exit_code: SPAWN_FAILED_EXIT_CODE,
            termination: TerminationReason::SpawnFailed,
        }
    }
}

/// Kills a process together with every descendant it spawned.
pub trait TreeTerminator: Send + Sync {
    fn name(&self) -> &'static str;
    fn terminate(&self, child: &mut Child) -> Result<()>;
}

/// Signals the process group established at spawn time.
#[cfg(unix)]
pub struct ProcessGroupTerminator;

#[cfg(unix)]
impl TreeTerminator for ProcessGroupTerminator {
    fn name(&self) -> &'static str {
        "process-group-kill"
    }

    fn terminate(&self, child: &mut Child) -> Result<()> {
        let pgid = libc::pid_t::try_from(child.id()).context("pid out of range")?;
        // SAFETY: kill(2) with a negative pid only signals that process group.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        let group_err = std::io::Error::last_os_error();
        tracing::warn!(pgid, error = %group_err, "group kill failed; killing child only");
        child
            .kill()
            .with_context(|| format!("kill solver after group kill failed: {group_err}"))
    }
}

/// Uses the platform task-kill facility, addressing the tree by process id.
#[cfg_attr(unix, allow(dead_code))]
pub struct TaskKillTerminator;

#[cfg_attr(unix, allow(dead_code))]
impl TreeTerminator for TaskKillTerminator {
    fn name(&self) -> &'static str {
        "taskkill"
    }

    fn terminate(&self, child: &mut Child) -> Result<()> {
        let pid = child.id().to_string();
        let status = std::process::Command::new("taskkill")
            .args(["/PID", pid.as_str(), "/T", "/F"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => Ok(()),
            other => {
                tracing::warn!(pid = %pid, result = ?other, "taskkill failed; killing child only");
                child.kill().context("kill solver after taskkill failed")
            }
        }
    }
}

#[cfg(unix)]
pub fn platform_terminator() -> Box<dyn TreeTerminator> {
    Box::new(ProcessGroupTerminator)
}

#[cfg(not(unix))]
pub fn platform_terminator() -> Box<dyn TreeTerminator> {
    Box::new(TaskKillTerminator)
}

enum WaitResult {
    Exited(ExitStatus),
    TimedOut,
    Failed(anyhow::Error),
}

/// Waits on a launched solver under a deadline.
pub struct Supervisor<'a> {
    terminator: &'a dyn TreeTerminator,
    continuation_token: &'a str,
}

impl<'a> Supervisor<'a> {
    pub fn new(terminator: &'a dyn TreeTerminator, continuation_token: &'a str) -> Self {
        Self {
            terminator,
            continuation_token,
        }
    }

    /// Run the process to completion or to the deadline, whichever is first.
    pub fn supervise(&self, process: LaunchedProcess, timeout: Duration) -> ProcessExecution {
        let LaunchedProcess {
            mut child,
            plan,
            started_at,
            started,
        } = process;

        let stdout_capture = spawn_reader(child.stdout.take());
        let stderr_capture = spawn_reader(child.stderr.take());

        let waited = match self.feed_continuation(&mut child) {
            Ok(()) => self.wait_with_deadline(&mut child, started, timeout),
            Err(err) => WaitResult::Failed(err),
        };

        let (exit_code, termination, note) = match waited {
            WaitResult::Exited(status) => (exit_code_of(&status), TerminationReason::Completed, None),
            WaitResult::TimedOut => (
                TIMEOUT_EXIT_CODE,
                TerminationReason::TimedOut,
                Some(format!(
                    "[timeout] process exceeded {}s and was terminated",
                    timeout.as_secs_f64()
                )),
            ),
            WaitResult::Failed(err) => {
                self.abort(&mut child);
                (
                    SPAWN_FAILED_EXIT_CODE,
                    TerminationReason::SpawnFailed,
                    Some(format!("failed while supervising solver: {err:#}")),
                )
            }
        };

        let stdout = drain(stdout_capture, "stdout");
        let mut stderr = drain(stderr_capture, "stderr");
        if let Some(note) = note {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&note);
        }

        tracing::info!(
            exit_code,
            termination = %termination,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "solver finished"
        );

        ProcessExecution {
            command_line: plan.command_line,
            working_dir: plan.working_dir,
            started_at,
            finished_at: Local::now(),
            stdout,
            stderr,
            exit_code,
            termination,
        }
    }

    fn feed_continuation(&self, child: &mut Child) -> Result<()> {
        let Some(mut stdin) = child.stdin.take() else {
            return Ok(());
        };
        let written = stdin
            .write_all(self.continuation_token.as_bytes())
            .and_then(|()| stdin.flush());
        match written {
            Ok(()) => Ok(()),
            // The solver exited or closed stdin without reading; not a failure.
            Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
            Err(err) => Err(anyhow!(err).context("write continuation token")),
        }
    }

    fn wait_with_deadline(
        &self,
        child: &mut Child,
        started: std::time::Instant,
        timeout: Duration,
    ) -> WaitResult {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return WaitResult::Exited(status),
                Ok(None) => {}
                Err(err) => return WaitResult::Failed(anyhow!(err).context("check solver status")),
            }
            if started.elapsed() >= timeout {
                tracing::warn!(
                    pid = child.id(),
                    timeout_secs = timeout.as_secs(),
                    terminator = self.terminator.name(),
                    "solver exceeded timeout; terminating process tree"
                );
                if let Err(err) = self.terminator.terminate(child) {
                    tracing::warn!(error = %format!("{err:#}"), "tree termination failed");
                }
                if let Err(err) = child.wait() {
                    tracing::warn!(error = %err, "could not reap solver after termination");
                }
                return WaitResult::TimedOut;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn abort(&self, child: &mut Child) {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        if let Err(err) = self.terminator.terminate(child) {
            tracing::warn!(error = %format!("{err:#}"), "could not terminate solver");
        }
        let _ = child.wait();
    }
}

/// Bytes read so far from one output stream, plus a signal sent once the
/// stream reaches end of file.
struct StreamCapture {
    bytes: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> StreamCapture {
    let bytes = Arc::new(Mutex::new(Vec::new()));
    let (tx, done) = mpsc::channel();
    let sink = Arc::clone(&bytes);
    std::thread::spawn(move || {
        if let Some(mut stream) = stream {
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        }
        let _ = tx.send(());
    });
    StreamCapture { bytes, done }
}

/// Everything the stream produced. A descendant that still holds the pipe
/// open cuts the wait short; the bytes read up to then are kept.
fn drain(capture: StreamCapture, label: &str) -> String {
    if capture.done.recv_timeout(STREAM_DRAIN_GRACE).is_err() {
        tracing::warn!(
            stream = label,
            "output stream still open after process exit; keeping output read so far"
        );
    }
    let bytes = capture.bytes.lock().unwrap_or_else(PoisonError::into_inner);
    decode_deck_bytes(&bytes)
}

fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
