// Process runner integration tests
// Uses /bin/sh stages to exercise ordering, cancellation and deadlines

#![cfg(unix)]

use crypto_compiler::build_system::{
    CancellationToken, CaptureMode, Invocation, OutputStream, ProcessRunner, RunOutcome, RunnerOptions, StageKind,
};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn sh(kind: StageKind, script: &str) -> Invocation {
    Invocation::stage(kind, "/bin/sh", ["-c", script], ".")
}

#[test]
fn test_stages_run_in_order() {
    let runner = ProcessRunner::default();
    let invocation = Invocation::sequence(vec![
        sh(StageKind::Compile, "echo compile"),
        sh(StageKind::Archive, "echo archive"),
    ])
    .unwrap();

    let mut seen = Vec::new();
    let result = runner.run(&invocation, &CancellationToken::new(), |line| seen.push((line.stage, line.kind, line.text.clone())));

    assert!(result.success());
    assert_eq!(result.stages_run, 2);
    assert_eq!(
        seen,
        vec![
            (0, StageKind::Compile, "compile".to_string()),
            (1, StageKind::Archive, "archive".to_string()),
        ]
    );
}

#[test]
fn test_failing_stage_aborts_the_rest() {
    let runner = ProcessRunner::default();
    let invocation = Invocation::sequence(vec![
        sh(StageKind::Compile, "echo one"),
        sh(StageKind::Archive, "echo two; exit 3"),
        sh(StageKind::Run, "echo three"),
    ])
    .unwrap();

    let result = runner.run(&invocation, &CancellationToken::new(), |_| {});

    assert_eq!(result.outcome, RunOutcome::Failed);
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stages_run, 2);
    assert_eq!(result.stdout, "one\ntwo\n");
    assert_eq!(runner.spawned(), 2);
}

#[test]
fn test_spawn_failure_in_later_stage_keeps_earlier_output() {
    let runner = ProcessRunner::default();
    let invocation = Invocation::sequence(vec![
        sh(StageKind::Compile, "echo built"),
        Invocation::stage(StageKind::Archive, "/nonexistent/ar", ["rcs"], "."),
    ])
    .unwrap();

    let result = runner.run(&invocation, &CancellationToken::new(), |_| {});
    assert_eq!(result.outcome, RunOutcome::SpawnFailed);
    assert_eq!(result.stages_run, 1);
    assert_eq!(result.combined, "built\n");
    assert!(result.error.is_some());
}

#[test]
fn test_working_directory_and_environment() {
    let temp_dir = TempDir::new().unwrap();
    let invocation = Invocation::stage(StageKind::Run, "/bin/sh", ["-c", "pwd -P; echo \"$CCBUILD_TEST_VALUE\""], temp_dir.path())
        .with_env("CCBUILD_TEST_VALUE", "overlay");

    let result = ProcessRunner::default().run(&invocation, &CancellationToken::new(), |_| {});
    let expected_dir = fs::canonicalize(temp_dir.path()).unwrap();
    assert_eq!(result.stdout, format!("{}\noverlay\n", expected_dir.display()));
}

#[test]
fn test_stderr_is_tagged() {
    let mut streams = Vec::new();
    let invocation = sh(StageKind::Compile, "echo 'main.cpp:1:1: error: boom' 1>&2");
    let result = ProcessRunner::default().run(&invocation, &CancellationToken::new(), |line| streams.push(line.stream));
    assert_eq!(streams, vec![OutputStream::Stderr]);
    assert_eq!(result.exit_code, 0);
    assert!(result.diagnostic_text().contains("error: boom"));
}

#[test]
fn test_cancellation_stops_output_promptly() {
    let runner = ProcessRunner::default();
    let token = CancellationToken::new();
    let delivered = Arc::new(AtomicUsize::new(0));

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            token.cancel();
        })
    };

    let invocation = sh(StageKind::Run, "i=0; while true; do echo line$i; i=$((i+1)); sleep 0.02; done");
    let counter = Arc::clone(&delivered);
    let started = Instant::now();
    let result = runner.run(&invocation, &token, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    canceller.join().unwrap();

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert!(!result.timed_out);
    assert!(started.elapsed() < Duration::from_secs(5));

    let after_return = delivered.load(Ordering::SeqCst);
    assert!(after_return > 0);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(delivered.load(Ordering::SeqCst), after_return);
}

#[test]
fn test_cancellation_kills_the_process_group() {
    let temp_dir = TempDir::new().unwrap();
    let marker = temp_dir.path().join("grandchild-finished");
    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            token.cancel();
        })
    };

    // The background subshell shares the group; if it survives it leaves the marker behind
    let script = format!("(sleep 1; touch '{}') & echo spawned; wait", marker.display());
    let invocation = sh(StageKind::Compile, &script);
    let started = Instant::now();
    let result = ProcessRunner::default().run(&invocation, &token, |_| {});
    canceller.join().unwrap();

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));

    thread::sleep(Duration::from_millis(1500));
    assert!(!marker.exists());
}

#[test]
fn test_deadline_times_out() {
    let runner = ProcessRunner::new(RunnerOptions {
        capture: CaptureMode::Split,
        deadline: Some(Duration::from_millis(200)),
    });
    let started = Instant::now();
    let result = runner.run(&sh(StageKind::Compile, "sleep 30"), &CancellationToken::new(), |_| {});

    assert_eq!(result.outcome, RunOutcome::TimedOut);
    assert!(result.timed_out);
    assert_eq!(result.exit_code, 128 + 9);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_combined_capture_keeps_write_order_across_stages() {
    let runner = ProcessRunner::new(RunnerOptions {
        capture: CaptureMode::Combined,
        deadline: None,
    });
    let invocation = Invocation::sequence(vec![
        sh(StageKind::Compile, "echo a; echo b 1>&2"),
        sh(StageKind::Run, "echo c 1>&2; echo d"),
    ])
    .unwrap();

    let result = runner.run(&invocation, &CancellationToken::new(), |line| assert_eq!(line.stream, OutputStream::Combined));
    assert_eq!(result.combined, "a\nb\nc\nd\n");
}
