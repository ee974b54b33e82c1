// Environment validation
// Probes configured compilers, runtimes and library directories

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::build_system::config::{ConfigModel, RuntimeKind};
use crate::build_system::request::{CompilerKind, Library};

/// Probes configured compilers, runtimes and library directories
pub struct EnvironmentValidator;

impl EnvironmentValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check every configured tool and library
    pub fn validate_environment(&self, config: &ConfigModel) -> Result<EnvironmentStatus, EnvironmentError> {
        let compilers: Vec<ToolStatus> = CompilerKind::ALL
            .iter()
            .filter_map(|&kind| {
                let path = config.compiler(kind)?.executable()?;
                Some(self.probe(&kind.to_string(), path, version_args_for_compiler(kind)))
            })
            .collect();

        if compilers.is_empty() {
            return Err(EnvironmentError::NoToolchainConfigured);
        }

        let runtimes: Vec<ToolStatus> = [RuntimeKind::ManagedRuntime, RuntimeKind::Jvm, RuntimeKind::Debugger]
            .iter()
            .filter_map(|&kind| {
                let path = config.runtimes.path_for(kind)?;
                let args: &[&str] = if kind == RuntimeKind::Jvm { &["-version"] } else { &["--version"] };
                Some(self.probe(&kind.to_string(), path, args))
            })
            .collect();

        let libraries = config
            .libraries
            .iter()
            .map(|(&library, entry)| LibraryStatus {
                library,
                missing_dirs: entry
                    .include_dirs
                    .iter()
                    .chain(entry.lib_dirs.iter())
                    .filter(|dir| !dir.is_dir())
                    .cloned()
                    .collect(),
            })
            .collect::<Vec<_>>();

        let overall_status = determine_overall_status(&compilers, &runtimes, &libraries);

        Ok(EnvironmentStatus {
            compilers,
            runtimes,
            libraries,
            overall_status,
        })
    }

    /// Run `path args` and report whether it answered
    pub fn probe(&self, name: &str, path: &Path, args: &[&str]) -> ToolStatus {
        debug!(tool = name, path = %path.display(), "probing tool");
        let output = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                // Java tools and cl.exe print their banner on stderr
                let version = first_line(&stdout).or_else(|| first_line(&stderr));
                ToolStatus {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                    available: true,
                    version,
                    error: None,
                }
            }
            Err(e) => ToolStatus {
                name: name.to_string(),
                path: path.to_path_buf(),
                available: false,
                version: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl Default for EnvironmentValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn version_args_for_compiler(kind: CompilerKind) -> &'static [&'static str] {
    match kind {
        CompilerKind::JavaCompiler => &["-version"],
        CompilerKind::MsvcLike => &[],
        _ => &["--version"],
    }
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn determine_overall_status(compilers: &[ToolStatus], runtimes: &[ToolStatus], libraries: &[LibraryStatus]) -> ValidationStatus {
    if !compilers.iter().any(|c| c.available) {
        ValidationStatus::Invalid
    } else if compilers.iter().chain(runtimes).any(|t| !t.available)
        || libraries.iter().any(|l| !l.missing_dirs.is_empty())
    {
        ValidationStatus::Warning
    } else {
        ValidationStatus::Valid
    }
}

/// Result of probing the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub compilers: Vec<ToolStatus>,
    pub runtimes: Vec<ToolStatus>,
    pub libraries: Vec<LibraryStatus>,
    pub overall_status: ValidationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStatus {
    pub name: String,
    pub path: PathBuf,
    pub available: bool,
    /// First line of the tool's version banner
    pub version: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryStatus {
    pub library: Library,
    pub missing_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Valid,
    Warning,
    Invalid,
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("no compiler is configured")]
    NoToolchainConfigured,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_system::config::{CompilerConfig, Platform};

    #[test]
    fn test_empty_config_is_an_error() {
        let result = EnvironmentValidator::new().validate_environment(&ConfigModel::default());
        assert!(matches!(result, Err(EnvironmentError::NoToolchainConfigured)));
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let status = EnvironmentValidator::new().probe("gcc", Path::new("/nonexistent/g++"), &["--version"]);
        assert!(!status.available);
        assert!(status.error.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_reads_first_line() {
        let status = EnvironmentValidator::new().probe("sh", Path::new("/bin/sh"), &["-c", "echo; echo 'fake 1.0'; echo more"]);
        assert!(status.available);
        assert_eq!(status.version.as_deref(), Some("fake 1.0"));
    }

    #[test]
    fn test_overall_status() {
        let mut config = ConfigModel::host_default(Platform::Linux);
        config.compilers.clear();
        config.compilers.insert(CompilerKind::Gcc, CompilerConfig {
            path: Some(PathBuf::from("/nonexistent/g++")),
            ..CompilerConfig::default()
        });
        let status = EnvironmentValidator::new().validate_environment(&config).unwrap();
        assert_eq!(status.compilers.len(), 1);
        assert_eq!(status.overall_status, ValidationStatus::Invalid);
    }
}
