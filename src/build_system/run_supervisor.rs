// Artifact execution
// Runs a produced binary directly or through its runtime, and plans debugger sessions

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::build_system::command_builder::{local_program, parent_dir, with_loader_path, ConfigurationError};
use crate::build_system::config::{ConfigModel, Platform, RuntimeKind};
use crate::build_system::invocation::{Invocation, StageKind};
use crate::build_system::process_runner::{
    ensure_executable, exit_code, BuildResult, CancellationToken, OutputLine, ProcessError, ProcessRunner,
};
use crate::build_system::request::{BuildRequest, BuildType, Language};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    #[error("{path} is a {build_type} and cannot be run directly")]
    NotExecutable { path: PathBuf, build_type: BuildType },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("could not make {path} executable: {source}")]
    Permission { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Invocation that executes `artifact` as built for `request`
pub fn artifact_invocation(
    artifact: &Path,
    request: &BuildRequest,
    config: &ConfigModel,
    platform: Platform,
) -> Result<Invocation, RunError> {
    ensure_runnable(artifact, request)?;
    let dir = parent_dir(artifact);
    let file_name = file_name(artifact);

    let invocation = match request.language {
        Language::Native | Language::NativeWithHostBridge => {
            let stage = Invocation::stage(StageKind::Run, local_program(artifact), Vec::<String>::new(), dir);
            with_loader_path(stage, platform, &runtime_lib_dirs(request, config))
        }
        Language::ManagedClr => match config.runtimes.path_for(RuntimeKind::ManagedRuntime) {
            Some(runtime) => Invocation::stage(StageKind::Run, runtime, [file_name], dir),
            None => Invocation::stage(StageKind::Run, local_program(artifact), Vec::<String>::new(), dir),
        },
        Language::Jvm => {
            let java = config
                .runtimes
                .path_for(RuntimeKind::Jvm)
                .ok_or(ConfigurationError::MissingRuntimePath(RuntimeKind::Jvm))?;
            let class_name = artifact
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or(file_name);
            Invocation::stage(StageKind::Run, java, ["-cp".to_string(), ".".to_string(), class_name], dir)
        }
    };

    Ok(invocation)
}

/// Invocation that opens `artifact` in the configured native debugger
pub fn debugger_invocation(artifact: &Path, request: &BuildRequest, config: &ConfigModel) -> Result<Invocation, RunError> {
    ensure_runnable(artifact, request)?;
    if !matches!(request.language, Language::Native) {
        return Err(RunError::NotExecutable {
            path: artifact.to_path_buf(),
            build_type: request.build_type,
        });
    }

    let debugger = config
        .runtimes
        .path_for(RuntimeKind::Debugger)
        .ok_or(ConfigurationError::MissingRuntimePath(RuntimeKind::Debugger))?;

    Ok(Invocation::stage(
        StageKind::Run,
        debugger,
        [local_program(artifact).to_string_lossy().into_owned()],
        parent_dir(artifact),
    ))
}

fn ensure_runnable(artifact: &Path, request: &BuildRequest) -> Result<(), RunError> {
    if request.build_type.is_library() {
        return Err(RunError::NotExecutable {
            path: artifact.to_path_buf(),
            build_type: request.build_type,
        });
    }
    Ok(())
}

fn runtime_lib_dirs(request: &BuildRequest, config: &ConfigModel) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for &library in &request.libraries {
        if let Some(entry) = config.library(library) {
            for dir in entry.resolve_for(request.compiler).lib_dirs {
                if dir.is_dir() && !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
    }
    dirs
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Executes built artifacts through the shared process runner
#[derive(Debug, Clone)]
pub struct RunSupervisor {
    config: Arc<ConfigModel>,
    platform: Platform,
    runner: ProcessRunner,
}

impl RunSupervisor {
    pub fn new(config: Arc<ConfigModel>, platform: Platform, runner: ProcessRunner) -> Self {
        Self { config, platform, runner }
    }

    /// Validated invocation for running `artifact`
    pub fn prepare(&self, artifact: &Path, request: &BuildRequest) -> Result<Invocation, RunError> {
        if !artifact.exists() {
            return Err(RunError::ArtifactNotFound(artifact.to_path_buf()));
        }
        let invocation = artifact_invocation(artifact, request, &self.config, self.platform)?;

        if matches!(request.language, Language::Native) {
            make_executable(artifact)?;
        }
        Ok(invocation)
    }

    /// Run `artifact`, streaming its output to `on_line`
    pub fn run_artifact<F>(
        &self,
        artifact: &Path,
        request: &BuildRequest,
        cancel: &CancellationToken,
        on_line: F,
    ) -> Result<BuildResult, RunError>
    where
        F: FnMut(&OutputLine),
    {
        let invocation = self.prepare(artifact, request)?;
        info!(artifact = %artifact.display(), command = %invocation.command_line(), "running artifact");
        Ok(self.runner.run(&invocation, cancel, on_line))
    }

    /// Start the debugger attached to the terminal and wait for it to exit
    pub fn launch_debugger(&self, artifact: &Path, request: &BuildRequest) -> Result<i32, RunError> {
        if !artifact.exists() {
            return Err(RunError::ArtifactNotFound(artifact.to_path_buf()));
        }
        let invocation = debugger_invocation(artifact, request, &self.config)?;
        make_executable(artifact)?;

        debug!(command = %invocation.command_line(), "launching debugger");
        let status = invocation.to_command().status().map_err(|source| ProcessError::Spawn {
            stage: 0,
            executable: invocation.executable.display().to_string(),
            source,
        })?;
        Ok(exit_code(status))
    }
}

fn make_executable(path: &Path) -> Result<(), RunError> {
    ensure_executable(path).map_err(|source| RunError::Permission {
        path: path.to_path_buf(),
        source,
    })
}
