// Invocation model
// Fully resolved description of the child processes a build will execute

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use serde::{Deserialize, Serialize};

/// Role of a stage within a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Compile,
    Archive,
    Run,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Compile => write!(f, "compile"),
            StageKind::Archive => write!(f, "archive"),
            StageKind::Run => write!(f, "run"),
        }
    }
}

/// One child-process execution, or an ordered sequence of them.
///
/// `arguments` is the full argument vector, so `arguments[0]` is the
/// executable. When `multi_stage` is set it holds every stage in order and
/// the top-level fields describe the first one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
    pub environment_overlay: BTreeMap<String, String>,
    pub kind: StageKind,
    /// Set the execute bit on the program before spawning it
    #[serde(default)]
    pub ensure_executable: bool,
    pub multi_stage: Option<Vec<Invocation>>,
}

impl Invocation {
    /// Single stage invocation of `executable` with `args` after it
    pub fn stage<I, S>(kind: StageKind, executable: impl Into<PathBuf>, args: I, working_directory: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let executable = executable.into();
        let mut arguments = vec![executable.to_string_lossy().into_owned()];
        arguments.extend(args.into_iter().map(Into::into));

        Self {
            executable,
            arguments,
            working_directory: working_directory.into(),
            environment_overlay: BTreeMap::new(),
            kind,
            ensure_executable: false,
            multi_stage: None,
        }
    }

    /// Add `key=value` to the child's environment
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_overlay.insert(key.into(), value.into());
        self
    }

    /// Mark the program as a freshly built artifact that may lack its execute bit
    pub fn with_ensure_executable(mut self) -> Self {
        self.ensure_executable = true;
        self
    }

    /// Program path as seen from the parent process
    pub fn program_path(&self) -> PathBuf {
        if self.executable.is_absolute() {
            self.executable.clone()
        } else {
            self.working_directory.join(&self.executable)
        }
    }

    /// Chain stages into one invocation. A single stage is returned unchanged.
    pub fn sequence(mut stages: Vec<Invocation>) -> Option<Self> {
        match stages.len() {
            0 => None,
            1 => stages.pop(),
            _ => {
                let first = stages[0].clone();
                Some(Self {
                    multi_stage: Some(stages),
                    ..first
                })
            }
        }
    }

    /// Stages in execution order
    pub fn stages(&self) -> Vec<&Invocation> {
        match &self.multi_stage {
            Some(stages) => stages.iter().collect(),
            None => vec![self],
        }
    }

    /// True when more than one stage is chained
    pub fn is_multi_stage(&self) -> bool {
        self.multi_stage.is_some()
    }

    /// Arguments after the executable
    pub fn args(&self) -> &[String] {
        self.arguments.get(1..).unwrap_or(&[])
    }

    /// Shell-style preview of every stage, joined with `&&`
    pub fn command_line(&self) -> String {
        self.stages()
            .iter()
            .map(|stage| {
                stage
                    .arguments
                    .iter()
                    .map(|arg| shell_quote(arg))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }

    /// `std::process::Command` for this stage; stdio is left to the caller
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command.args(self.args());
        if !self.working_directory.as_os_str().is_empty() {
            command.current_dir(&self.working_directory);
        }
        command.envs(&self.environment_overlay);
        command
    }

    /// True when any argument mentions `needle`
    pub fn contains_argument(&self, needle: &Path) -> bool {
        let needle = needle.to_string_lossy();
        self.arguments.iter().any(|arg| arg.contains(needle.as_ref()))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%\\".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_puts_executable_first() {
        let inv = Invocation::stage(StageKind::Compile, "/usr/bin/g++", ["main.cpp", "-o", "main"], "/tmp");
        assert_eq!(inv.arguments[0], "/usr/bin/g++");
        assert_eq!(inv.args(), &["main.cpp", "-o", "main"]);
        assert!(!inv.is_multi_stage());
    }

    #[test]
    fn test_sequence_mirrors_first_stage() {
        let compile = Invocation::stage(StageKind::Compile, "g++", ["-c", "a.cpp"], ".");
        let archive = Invocation::stage(StageKind::Archive, "ar", ["rcs", "liba.a", "a.o"], ".");
        let seq = Invocation::sequence(vec![compile.clone(), archive]).unwrap();

        assert_eq!(seq.executable, compile.executable);
        assert_eq!(seq.stages().len(), 2);
        assert_eq!(seq.stages()[1].kind, StageKind::Archive);
        assert_eq!(seq.command_line(), "g++ -c a.cpp && ar rcs liba.a a.o");
    }

    #[test]
    fn test_sequence_of_one_is_plain() {
        let single = Invocation::stage(StageKind::Run, "./app", Vec::<String>::new(), ".");
        let seq = Invocation::sequence(vec![single.clone()]).unwrap();
        assert_eq!(seq, single);
        assert!(Invocation::sequence(Vec::new()).is_none());
    }

    #[test]
    fn test_program_path_resolves_in_working_directory() {
        let local = Invocation::stage(StageKind::Run, "./app_gcc", Vec::<String>::new(), "/work/gcc");
        assert_eq!(local.program_path(), PathBuf::from("/work/gcc/./app_gcc"));
        assert!(!local.ensure_executable);
        assert!(local.with_ensure_executable().ensure_executable);

        let absolute = Invocation::stage(StageKind::Run, "/usr/bin/mono", ["App.exe"], "/work/csc");
        assert_eq!(absolute.program_path(), PathBuf::from("/usr/bin/mono"));
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let inv = Invocation::stage(StageKind::Compile, "g++", ["my file.cpp", "it's"], ".");
        assert_eq!(inv.command_line(), r"g++ 'my file.cpp' 'it'\''s'");
    }
}
