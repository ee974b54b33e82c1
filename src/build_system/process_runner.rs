// Process runner
// Child process execution with streamed output and cancellation

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build_system::invocation::{Invocation, StageKind};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit code reported when a stage could not be started
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

/// Shared flag used to stop a running invocation
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How child stdout and stderr are captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Separate pipes; cross-stream order is best effort
    #[default]
    Split,
    /// One pipe for both streams; lines arrive in the order the child wrote them
    Combined,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerOptions {
    pub capture: CaptureMode,
    /// Overall limit for the whole invocation, unlimited when `None`
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
    Combined,
}

/// One line of child output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    /// Index of the stage that produced it
    pub stage: usize,
    pub kind: StageKind,
    pub stream: OutputStream,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start stage {stage} ({executable}): {source}")]
    Spawn {
        stage: usize,
        executable: String,
        source: std::io::Error,
    },

    #[error("failed to set up output pipes for stage {stage}: {source}")]
    Pipe { stage: usize, source: std::io::Error },

    #[error("failed to wait for stage {stage}: {source}")]
    Wait { stage: usize, source: std::io::Error },

    #[error("cannot make {path} executable for stage {stage}: {source}")]
    Permission {
        stage: usize,
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Success,
    Failed,
    Cancelled,
    TimedOut,
    SpawnFailed,
}

/// Aggregate result of all stages that ran
#[derive(Debug)]
pub struct BuildResult {
    /// Exit code of the last stage that ran
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Every line in delivery order
    pub combined: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub outcome: RunOutcome,
    pub stages_run: usize,
    pub error: Option<ProcessError>,
}

impl BuildResult {
    /// True when every stage exited with 0
    pub fn success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// Text to feed the error classifier
    pub fn diagnostic_text(&self) -> &str {
        &self.combined
    }

    fn empty() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            combined: String::new(),
            duration_ms: 0,
            timed_out: false,
            outcome: RunOutcome::Success,
            stages_run: 0,
            error: None,
        }
    }

    fn record(&mut self, line: &OutputLine) {
        let target = match line.stream {
            OutputStream::Stdout => Some(&mut self.stdout),
            OutputStream::Stderr => Some(&mut self.stderr),
            OutputStream::Combined => None,
        };
        if let Some(target) = target {
            target.push_str(&line.text);
            target.push('\n');
        }
        self.combined.push_str(&line.text);
        self.combined.push('\n');
    }
}

enum StageEnd {
    Exited(i32),
    Cancelled(i32),
    TimedOut(i32),
}

/// Runs invocations stage by stage, one OS process per stage
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    options: RunnerOptions,
    spawned: Arc<AtomicUsize>,
}

impl ProcessRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self {
            options,
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Number of processes started by this runner and its clones
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Execute every stage in order, stopping at the first failure.
    ///
    /// `on_line` is called on the current thread as output arrives and is
    /// never called after this returns.
    pub fn run<F>(&self, invocation: &Invocation, cancel: &CancellationToken, mut on_line: F) -> BuildResult
    where
        F: FnMut(&OutputLine),
    {
        let start = Instant::now();
        // A deadline too far out to represent means no deadline
        let deadline = self.options.deadline.and_then(|limit| start.checked_add(limit));
        let mut result = BuildResult::empty();

        for (index, stage) in invocation.stages().into_iter().enumerate() {
            if cancel.is_cancelled() {
                result.outcome = RunOutcome::Cancelled;
                break;
            }

            let end = self.run_stage(index, stage, cancel, deadline, &mut |line: OutputLine| {
                result.record(&line);
                on_line(&line);
            });

            match end {
                Ok(StageEnd::Exited(code)) => {
                    result.stages_run += 1;
                    result.exit_code = code;
                    debug!(stage = index, exit_code = code, "stage exited");
                    if code != 0 {
                        result.outcome = RunOutcome::Failed;
                        break;
                    }
                }
                Ok(StageEnd::Cancelled(code)) => {
                    result.stages_run += 1;
                    result.exit_code = code;
                    result.outcome = RunOutcome::Cancelled;
                    info!(stage = index, "stage cancelled");
                    break;
                }
                Ok(StageEnd::TimedOut(code)) => {
                    result.stages_run += 1;
                    result.exit_code = code;
                    result.timed_out = true;
                    result.outcome = RunOutcome::TimedOut;
                    warn!(stage = index, "deadline expired, stage killed");
                    break;
                }
                Err(err) => {
                    warn!(stage = index, error = %err, "stage could not run");
                    result.exit_code = SPAWN_FAILED_EXIT_CODE;
                    result.outcome = RunOutcome::SpawnFailed;
                    result.error = Some(err);
                    break;
                }
            }
        }

        result.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        result
    }

    fn run_stage(
        &self,
        index: usize,
        stage: &Invocation,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        deliver: &mut dyn FnMut(OutputLine),
    ) -> Result<StageEnd, ProcessError> {
        let (tx, rx) = mpsc::channel::<(OutputStream, String)>();
        let mut child = self.spawn(index, stage, tx)?;
        info!(stage = index, kind = %stage.kind, pid = child.id(), command = %stage.command_line(), "spawned stage");

        let kind = stage.kind;
        // Poll until the child exits, forwarding lines as they arrive
        let end = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(item) => emit(deliver, index, kind, item),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }

            if cancel.is_cancelled() {
                break StageEnd::Cancelled(kill_and_reap(&mut child, index)?);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break StageEnd::TimedOut(kill_and_reap(&mut child, index)?);
            }

            match child.try_wait() {
                Ok(Some(status)) => break StageEnd::Exited(exit_code(status)),
                Ok(None) => {}
                Err(source) => {
                    kill_tree(&mut child);
                    return Err(ProcessError::Wait { stage: index, source });
                }
            }
        };

        if let StageEnd::Exited(code) = end {
            // Flush what the readers still hold; a lingering grandchild can keep a pipe open
            loop {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(item) => emit(deliver, index, kind, item),
                    Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if cancel.is_cancelled() {
                            kill_tree(&mut child);
                            return Ok(StageEnd::Cancelled(code));
                        }
                        if deadline.is_some_and(|d| Instant::now() >= d) {
                            kill_tree(&mut child);
                            return Ok(StageEnd::TimedOut(code));
                        }
                    }
                }
            }
        }

        Ok(end)
    }

    fn spawn(&self, index: usize, stage: &Invocation, tx: Sender<(OutputStream, String)>) -> Result<Child, ProcessError> {
        if stage.ensure_executable {
            let path = stage.program_path();
            ensure_executable(&path).map_err(|source| ProcessError::Permission { stage: index, path, source })?;
        }

        let mut command = stage.to_command();
        command.stdin(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let spawn_error = |source| ProcessError::Spawn {
            stage: index,
            executable: stage.executable.display().to_string(),
            source,
        };

        let child = match self.options.capture {
            CaptureMode::Split => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
                let mut child = command.spawn().map_err(spawn_error)?;
                if let Some(stdout) = child.stdout.take() {
                    spawn_reader(stdout, OutputStream::Stdout, tx.clone());
                }
                if let Some(stderr) = child.stderr.take() {
                    spawn_reader(stderr, OutputStream::Stderr, tx);
                }
                child
            }
            CaptureMode::Combined => {
                let (reader, writer) = std::io::pipe().map_err(|source| ProcessError::Pipe { stage: index, source })?;
                let writer_err = writer
                    .try_clone()
                    .map_err(|source| ProcessError::Pipe { stage: index, source })?;
                command.stdout(writer).stderr(writer_err);
                let child = command.spawn().map_err(spawn_error)?;
                // Close the parent's copies of the write end so the reader sees EOF
                drop(command);
                spawn_reader(reader, OutputStream::Combined, tx);
                child
            }
        };

        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(child)
    }
}

fn emit(deliver: &mut dyn FnMut(OutputLine), stage: usize, kind: StageKind, (stream, text): (OutputStream, String)) {
    deliver(OutputLine { stage, kind, stream, text });
}

fn spawn_reader<R: Read + Send + 'static>(pipe: R, stream: OutputStream, tx: Sender<(OutputStream, String)>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let text = text.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send((stream, text)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn kill_and_reap(child: &mut Child, index: usize) -> Result<i32, ProcessError> {
    kill_tree(child);
    child
        .wait()
        .map(exit_code)
        .map_err(|source| ProcessError::Wait { stage: index, source })
}

/// Kill the child and everything in its process group
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: signalling a process group we created; no memory is touched
            let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
            if rc == 0 {
                return;
            }
        }
    }
    let _ = child.kill();
}

/// Give `path` mode 755 unless it is already executable by everyone
#[cfg(unix)]
pub(crate) fn ensure_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    if permissions.mode() & 0o111 != 0o111 {
        permissions.set_mode(0o755);
        std::fs::set_permissions(path, permissions)?;
        debug!(path = %path.display(), "set execute permission");
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn ensure_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Exit code, or 128 + signal number for a signal-terminated child
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    SPAWN_FAILED_EXIT_CODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let runner = ProcessRunner::default();
        let inv = Invocation::stage(StageKind::Compile, "/nonexistent/compiler-binary", ["a.cpp"], ".");
        let result = runner.run(&inv, &CancellationToken::new(), |_| {});

        assert_eq!(result.outcome, RunOutcome::SpawnFailed);
        assert_eq!(result.exit_code, SPAWN_FAILED_EXIT_CODE);
        assert_eq!(result.stages_run, 0);
        assert!(matches!(result.error, Some(ProcessError::Spawn { stage: 0, .. })));
        assert_eq!(runner.spawned(), 0);
    }

    #[test]
    fn test_pre_cancelled_token_spawns_nothing() {
        let runner = ProcessRunner::default();
        let token = CancellationToken::new();
        token.cancel();
        let inv = Invocation::stage(StageKind::Run, "/nonexistent", Vec::<String>::new(), ".");
        let result = runner.run(&inv, &token, |_| {});
        assert_eq!(result.outcome, RunOutcome::Cancelled);
        assert_eq!(runner.spawned(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_unrepresentable_deadline_means_none() {
        let runner = ProcessRunner::new(RunnerOptions {
            capture: CaptureMode::Split,
            deadline: Some(Duration::from_secs(u64::MAX)),
        });
        let inv = Invocation::stage(StageKind::Compile, "/bin/sh", ["-c", "echo done"], ".");
        let result = runner.run(&inv, &CancellationToken::new(), |_| {});
        assert!(result.success());
        assert!(!result.timed_out);
        assert_eq!(result.stdout, "done\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_executable_stage_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let program = temp_dir.path().join("app_gcc");
        std::fs::write(&program, "#!/bin/sh\necho ran\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o644)).unwrap();

        let inv = Invocation::stage(StageKind::Run, "./app_gcc", Vec::<String>::new(), temp_dir.path()).with_ensure_executable();
        let result = ProcessRunner::default().run(&inv, &CancellationToken::new(), |_| {});
        assert!(result.success());
        assert_eq!(result.stdout, "ran\n");
        assert_eq!(std::fs::metadata(&program).unwrap().permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_ensure_executable_on_missing_program_is_a_permission_error() {
        let runner = ProcessRunner::default();
        let inv = Invocation::stage(StageKind::Run, "./absent", Vec::<String>::new(), "/nonexistent-dir").with_ensure_executable();
        let result = runner.run(&inv, &CancellationToken::new(), |_| {});
        if cfg!(unix) {
            assert!(matches!(result.error, Some(ProcessError::Permission { stage: 0, .. })));
        }
        assert_eq!(result.outcome, RunOutcome::SpawnFailed);
        assert_eq!(runner.spawned(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_split_capture() {
        let runner = ProcessRunner::default();
        let inv = Invocation::stage(StageKind::Compile, "/bin/sh", ["-c", "echo out; echo err 1>&2"], ".");
        let mut lines = Vec::new();
        let result = runner.run(&inv, &CancellationToken::new(), |line| lines.push(line.clone()));

        assert!(result.success());
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(runner.spawned(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_combined_capture_preserves_order() {
        let runner = ProcessRunner::new(RunnerOptions {
            capture: CaptureMode::Combined,
            deadline: None,
        });
        let inv = Invocation::stage(
            StageKind::Compile,
            "/bin/sh",
            ["-c", "echo one; echo two 1>&2; echo three; echo four 1>&2"],
            ".",
        );
        let result = runner.run(&inv, &CancellationToken::new(), |_| {});
        assert_eq!(result.combined, "one\ntwo\nthree\nfour\n");
        assert!(result.stdout.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_exit_code() {
        let runner = ProcessRunner::default();
        let inv = Invocation::stage(StageKind::Run, "/bin/sh", ["-c", "kill -9 $$"], ".");
        let result = runner.run(&inv, &CancellationToken::new(), |_| {});
        assert_eq!(result.exit_code, 137);
        assert_eq!(result.outcome, RunOutcome::Failed);
    }
}
