// Build system manager
// Orchestrates command generation, build workers, artifact runs and diagnostics

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info};

use crate::build_system::command_builder::{BuilderOptions, CommandBuilder, ConfigurationError};
use crate::build_system::config::ConfigModel;
use crate::build_system::environment::{EnvironmentError, EnvironmentStatus, EnvironmentValidator};
use crate::build_system::error_classifier::{ErrorClassifier, ErrorSummary};
use crate::build_system::invocation::{Invocation, StageKind};
use crate::build_system::process_runner::{BuildResult, CancellationToken, OutputLine, ProcessRunner, RunOutcome, RunnerOptions};
use crate::build_system::request::BuildRequest;
use crate::build_system::run_supervisor::{RunError, RunSupervisor};

/// Capacity of the worker → consumer event queue
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Messages a worker sends to its consumer, in order
#[derive(Debug)]
pub enum BuildEvent {
    Started { command: String, stages: usize },
    /// Output of compile and archive stages
    BuildLog(OutputLine),
    /// Output of the executed artifact
    RuntimeLog(OutputLine),
    ProcessFailed(String),
    Diagnostics(ErrorSummary),
    Finished(BuildResult),
}

#[derive(Debug, Error)]
pub enum BuildSystemError {
    #[error("a build is already running")]
    BuildAlreadyRunning,

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment validation failed: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("build worker panicked")]
    WorkerPanicked,
}

/// Handle to a running build or artifact run
pub struct BuildHandle {
    events: Receiver<BuildEvent>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl BuildHandle {
    /// Receiver of the worker's events, in send order
    pub fn events(&self) -> &Receiver<BuildEvent> {
        &self.events
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the worker to kill its current stage
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the remaining events until the worker finishes
    pub fn wait(self) -> Result<Vec<BuildEvent>, BuildSystemError> {
        let events: Vec<BuildEvent> = self.events.iter().collect();
        self.join.join().map_err(|_| BuildSystemError::WorkerPanicked)?;
        Ok(events)
    }
}

/// Clears the active-build flag when the worker ends, even by panic
struct ActiveBuild(Arc<AtomicBool>);

impl Drop for ActiveBuild {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Main build system manager
pub struct BuildSystemManager {
    config: Arc<ConfigModel>,
    builder: CommandBuilder,
    runner: ProcessRunner,
    classifier: ErrorClassifier,
    active: Arc<AtomicBool>,
}

impl BuildSystemManager {
    /// Manager with host builder options and an unlimited runner
    pub fn new(config: ConfigModel) -> Self {
        Self::with_options(config, BuilderOptions::default(), RunnerOptions::default())
    }

    /// Manager with explicit builder and runner options
    pub fn with_options(config: ConfigModel, builder: BuilderOptions, runner: RunnerOptions) -> Self {
        Self {
            config: Arc::new(config),
            builder: CommandBuilder::new(builder),
            runner: ProcessRunner::new(runner),
            classifier: ErrorClassifier::new(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ConfigModel {
        &self.config
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// True while a build worker holds the build slot
    pub fn is_building(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Invocation a build of `request` would execute
    pub fn preview(&self, request: &BuildRequest) -> Result<Invocation, BuildSystemError> {
        Ok(self.builder.build(request, &self.config)?)
    }

    /// Artifact path a build of `request` produces
    pub fn output_path(&self, request: &BuildRequest) -> Result<PathBuf, BuildSystemError> {
        Ok(self.builder.output_path(request)?)
    }

    /// Supervisor sharing this manager's config and runner
    pub fn supervisor(&self) -> RunSupervisor {
        RunSupervisor::new(Arc::clone(&self.config), self.builder.options().platform, self.runner.clone())
    }

    /// Probe the configured toolchain
    pub fn validate_environment(&self) -> Result<EnvironmentStatus, BuildSystemError> {
        Ok(EnvironmentValidator::new().validate_environment(&self.config)?)
    }

    /// Start building `request` on a worker thread.
    ///
    /// Fails with `BuildAlreadyRunning` while a previous build is live; nothing is spawned in that case.
    pub fn start_build(&self, request: &BuildRequest) -> Result<BuildHandle, BuildSystemError> {
        let invocation = self.builder.build(request, &self.config)?;
        let output = self.builder.output_path(request)?;

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BuildSystemError::BuildAlreadyRunning);
        }
        let guard = ActiveBuild(Arc::clone(&self.active));

        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let (tx, rx) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runner = self.runner.clone();
        let classifier = self.classifier.clone();

        info!(source = %request.source_path.display(), output = %output.display(), "starting build");
        let join = thread::Builder::new()
            .name("build-worker".to_string())
            .spawn(move || build_worker(invocation, runner, classifier, token, tx, guard))?;

        Ok(BuildHandle { events: rx, cancel, join })
    }

    /// Run a built artifact on a worker thread
    pub fn start_run(&self, artifact: &Path, request: &BuildRequest) -> Result<BuildHandle, BuildSystemError> {
        let invocation = self.supervisor().prepare(artifact, request)?;

        let (tx, rx) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runner = self.runner.clone();

        info!(artifact = %artifact.display(), "starting run");
        let join = thread::Builder::new()
            .name("run-worker".to_string())
            .spawn(move || run_worker(invocation, runner, token, tx))?;

        Ok(BuildHandle { events: rx, cancel, join })
    }
}

fn build_worker(
    invocation: Invocation,
    runner: ProcessRunner,
    classifier: ErrorClassifier,
    cancel: CancellationToken,
    tx: SyncSender<BuildEvent>,
    guard: ActiveBuild,
) {
    // Send errors mean the consumer hung up; the build still runs to completion
    let _ = tx.send(BuildEvent::Started {
        command: invocation.command_line(),
        stages: invocation.stages().len(),
    });

    let mut build_output = String::new();
    let result = runner.run(&invocation, &cancel, |line| {
        if line.kind == StageKind::Run {
            let _ = tx.send(BuildEvent::RuntimeLog(line.clone()));
        } else {
            build_output.push_str(&line.text);
            build_output.push('\n');
            let _ = tx.send(BuildEvent::BuildLog(line.clone()));
        }
    });

    if let Some(err) = &result.error {
        let _ = tx.send(BuildEvent::ProcessFailed(err.to_string()));
    }
    if result.outcome != RunOutcome::Cancelled {
        let _ = tx.send(BuildEvent::Diagnostics(classifier.summarize(&build_output)));
    }

    debug!(outcome = ?result.outcome, exit_code = result.exit_code, duration_ms = result.duration_ms, "build finished");
    // Release the slot before announcing completion so the consumer can start the next build
    drop(guard);
    let _ = tx.send(BuildEvent::Finished(result));
}

fn run_worker(invocation: Invocation, runner: ProcessRunner, cancel: CancellationToken, tx: SyncSender<BuildEvent>) {
    let _ = tx.send(BuildEvent::Started {
        command: invocation.command_line(),
        stages: invocation.stages().len(),
    });

    let result = runner.run(&invocation, &cancel, |line| {
        let _ = tx.send(BuildEvent::RuntimeLog(line.clone()));
    });

    if let Some(err) = &result.error {
        let _ = tx.send(BuildEvent::ProcessFailed(err.to_string()));
    }
    debug!(outcome = ?result.outcome, exit_code = result.exit_code, "run finished");
    let _ = tx.send(BuildEvent::Finished(result));
}
