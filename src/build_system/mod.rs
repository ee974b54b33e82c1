// Build system for C/C++, C#, Java and JNI sources
// Provides command generation, process supervision, diagnostics and orchestration

pub mod config;
pub mod request;
pub mod invocation;
pub mod command_builder;
pub mod process_runner;
pub mod error_classifier;
pub mod run_supervisor;
pub mod environment;
pub mod manager;

pub use config::*;
pub use request::*;
pub use invocation::{Invocation, StageKind};
pub use command_builder::{derive_output_path, object_path, BuilderOptions, CommandBuilder, ConfigurationError, MissingDirectoryPolicy};
pub use process_runner::{
    BuildResult, CancellationToken, CaptureMode, OutputLine, OutputStream, ProcessError, ProcessRunner, RunOutcome,
    RunnerOptions,
};
pub use error_classifier::{ClassifiedError, ErrorCategory, ErrorClassifier, ErrorSummary, Severity, SourceLocation};
pub use run_supervisor::{artifact_invocation, debugger_invocation, RunError, RunSupervisor};
pub use environment::*;
pub use manager::{BuildEvent, BuildHandle, BuildSystemError, BuildSystemManager, EVENT_CHANNEL_CAPACITY};
