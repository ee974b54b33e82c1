// Build system manager tests
// Drives full build/run cycles through fake compiler scripts

#![cfg(unix)]

use crypto_compiler::build_system::{
    BuildEvent, BuildRequest, BuildSystemError, BuildSystemManager, BuilderOptions, CompilerConfig, CompilerKind,
    ConfigModel, ErrorCategory, Language, MissingDirectoryPolicy, Platform, RunError, RunOutcome, RunnerOptions,
    Severity,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Compiler stand-in: writes a runnable shell script to the `-o` target
const FAKE_GCC: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
echo "compiling $out"
echo "main.cpp:2:5: warning: unused variable 'key' [-Wunused-variable]" 1>&2
printf '#!/bin/sh\necho hello from artifact\n' > "$out"
chmod 644 "$out"
"#;

const BROKEN_GCC: &str = r#"#!/bin/sh
echo "main.cpp:1:10: fatal error: cryptopp/aes.h: No such file or directory" 1>&2
exit 1
"#;

const SLOW_GCC: &str = "#!/bin/sh\necho started\nsleep 30\n";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn manager_with_compiler(compiler: &Path) -> BuildSystemManager {
    let mut config = ConfigModel::default();
    config.compilers.insert(CompilerKind::Gcc, CompilerConfig {
        path: Some(compiler.to_path_buf()),
        debug_flags: vec!["-g".to_string()],
        ..CompilerConfig::default()
    });
    let options = BuilderOptions {
        missing_directory_policy: MissingDirectoryPolicy::Skip,
        platform: Platform::host(),
    };
    BuildSystemManager::with_options(config, options, RunnerOptions::default())
}

fn finished_outcome(events: &[BuildEvent]) -> Option<RunOutcome> {
    events.iter().find_map(|event| match event {
        BuildEvent::Finished(result) => Some(result.outcome),
        _ => None,
    })
}

fn wait_until_idle(manager: &BuildSystemManager) {
    let started = Instant::now();
    while manager.is_building() && started.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_successful_build_streams_logs_and_diagnostics() {
    let temp_dir = TempDir::new().unwrap();
    let compiler = write_script(temp_dir.path(), "fake-gcc", FAKE_GCC);
    let manager = manager_with_compiler(&compiler);
    let request = BuildRequest::new(Language::Native, CompilerKind::Gcc, temp_dir.path().join("main.cpp")).with_debug(true);

    let events = manager.start_build(&request).unwrap().wait().unwrap();

    assert!(matches!(events.first(), Some(BuildEvent::Started { stages: 1, .. })));
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Success));

    let logs: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            BuildEvent::BuildLog(line) => Some(line.text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(logs.len(), 2);

    let diagnostics = events
        .iter()
        .find_map(|event| match event {
            BuildEvent::Diagnostics(summary) => Some(summary),
            _ => None,
        })
        .unwrap();
    assert_eq!(diagnostics.shown.len(), 1);
    assert_eq!(diagnostics.shown[0].severity, Severity::Warning);

    // Output directory was created and the artifact written into it
    assert!(temp_dir.path().join("gcc").join("main_gcc").exists());
    assert!(!manager.is_building());
}

#[test]
fn test_failed_build_is_classified() {
    let temp_dir = TempDir::new().unwrap();
    let compiler = write_script(temp_dir.path(), "broken-gcc", BROKEN_GCC);
    let manager = manager_with_compiler(&compiler);
    let request = BuildRequest::new(Language::Native, CompilerKind::Gcc, temp_dir.path().join("main.cpp"));

    let events = manager.start_build(&request).unwrap().wait().unwrap();
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Failed));

    let summary = events
        .iter()
        .find_map(|event| match event {
            BuildEvent::Diagnostics(summary) => Some(summary),
            _ => None,
        })
        .unwrap();
    assert_eq!(summary.shown[0].severity, Severity::Fatal);
    assert_eq!(summary.shown[0].category, ErrorCategory::MissingFile);
}

#[test]
fn test_second_build_is_rejected_while_first_runs() {
    let temp_dir = TempDir::new().unwrap();
    let compiler = write_script(temp_dir.path(), "slow-gcc", SLOW_GCC);
    let manager = manager_with_compiler(&compiler);
    let request = BuildRequest::new(Language::Native, CompilerKind::Gcc, temp_dir.path().join("main.cpp"));

    let first = manager.start_build(&request).unwrap();
    // Wait for the first line so the child is known to be live
    loop {
        match first.events().recv_timeout(Duration::from_secs(5)).unwrap() {
            BuildEvent::BuildLog(line) if line.text == "started" => break,
            _ => {}
        }
    }
    let spawned_before = manager.runner().spawned();

    let second = manager.start_build(&request);
    assert!(matches!(second, Err(BuildSystemError::BuildAlreadyRunning)));
    assert_eq!(manager.runner().spawned(), spawned_before);

    first.cancel();
    let events = first.wait().unwrap();
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Cancelled));
    // No classification for a cancelled build
    assert!(!events.iter().any(|event| matches!(event, BuildEvent::Diagnostics(_))));

    wait_until_idle(&manager);
    assert!(!manager.is_building());
}

#[test]
fn test_run_artifact_sets_execute_bit() {
    let temp_dir = TempDir::new().unwrap();
    let compiler = write_script(temp_dir.path(), "fake-gcc", FAKE_GCC);
    let manager = manager_with_compiler(&compiler);
    let request = BuildRequest::new(Language::Native, CompilerKind::Gcc, temp_dir.path().join("main.cpp"));

    manager.start_build(&request).unwrap().wait().unwrap();
    let artifact = manager.output_path(&request).unwrap();
    let mode = fs::metadata(&artifact).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0);

    let events = manager.start_run(&artifact, &request).unwrap().wait().unwrap();
    let runtime: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            BuildEvent::RuntimeLog(line) => Some(line.text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(runtime, vec!["hello from artifact"]);
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Success));
    assert_eq!(fs::metadata(&artifact).unwrap().permissions().mode() & 0o777, 0o755);
}

#[test]
fn test_auto_run_sets_execute_bit_like_a_direct_run() {
    let temp_dir = TempDir::new().unwrap();
    let compiler = write_script(temp_dir.path(), "fake-gcc", FAKE_GCC);
    let manager = manager_with_compiler(&compiler);
    let request = BuildRequest::new(Language::Native, CompilerKind::Gcc, temp_dir.path().join("main.cpp"))
        .with_auto_run(true);

    // The fake compile leaves mode 644; the chained run stage fixes it before exec
    let events = manager.start_build(&request).unwrap().wait().unwrap();
    assert!(matches!(events.first(), Some(BuildEvent::Started { stages: 2, .. })));
    assert!(events.iter().any(|event| matches!(event, BuildEvent::BuildLog(_))));
    assert!(!events.iter().any(|event| matches!(event, BuildEvent::ProcessFailed(_))));

    let runtime: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            BuildEvent::RuntimeLog(line) => Some(line.text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(runtime, vec!["hello from artifact"]);
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Success));

    let artifact = manager.output_path(&request).unwrap();
    assert_eq!(fs::metadata(&artifact).unwrap().permissions().mode() & 0o777, 0o755);
}

#[test]
fn test_run_missing_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let compiler = write_script(temp_dir.path(), "fake-gcc", FAKE_GCC);
    let manager = manager_with_compiler(&compiler);
    let request = BuildRequest::new(Language::Native, CompilerKind::Gcc, temp_dir.path().join("main.cpp"));

    let result = manager.start_run(&temp_dir.path().join("absent"), &request);
    assert!(matches!(result, Err(BuildSystemError::Run(RunError::ArtifactNotFound(_)))));
    assert_eq!(manager.runner().spawned(), 0);
}

#[test]
fn test_missing_compiler_is_a_configuration_error() {
    let manager = BuildSystemManager::new(ConfigModel::default());
    let request = BuildRequest::new(Language::Native, CompilerKind::Clang, "main.cpp");
    assert!(matches!(manager.start_build(&request), Err(BuildSystemError::Configuration(_))));
    assert!(!manager.is_building());
}
