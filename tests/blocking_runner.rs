#![cfg(unix)]

mod common;
use crate::common::{commands, init_tracing, ms, os};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use procrun::config::ProcessConfig;
use procrun::errors::ProcrunError;
use procrun::exec::{run_blocking, LifecycleController};
use procrun::types::RunState;
use procrun_test_utils::CountingSpawner;

#[test]
fn captures_output_and_exit_code() {
    init_tracing();

    let cfg = commands::print_then_exit("hello", 0).with_timeout(ms(5000));
    let result = run_blocking(&cfg);

    assert!(result.fault.is_none(), "unexpected fault: {:?}", result.fault);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.logs, "hello");
    assert!(result.pid.is_some());
}

#[test]
fn non_zero_exit_is_not_a_fault() {
    init_tracing();

    let result = run_blocking(&commands::print_then_exit("failing", 3));

    assert!(result.fault.is_none());
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.logs, "failing");
    assert!(!result.is_success());
}

#[test]
fn stderr_is_merged_into_the_same_stream() {
    init_tracing();

    let result = run_blocking(&commands::stdout_and_stderr());

    assert_eq!(result.exit_code, 0);
    assert!(result.logs.contains("out\n"), "logs: {:?}", result.logs);
    assert!(result.logs.contains("err\n"), "logs: {:?}", result.logs);
}

#[test]
fn timeout_kills_child_and_keeps_partial_output() {
    init_tracing();

    let cfg = commands::print_then_hang("partial")
        .with_timeout(ms(300))
        .with_poll_interval(ms(50));

    let started = Instant::now();
    let result = run_blocking(&cfg);
    let took = started.elapsed();

    assert!(
        matches!(result.fault, Some(ProcrunError::Timeout(_))),
        "fault: {:?}",
        result.fault
    );
    assert_eq!(result.exit_code, cfg.default_error_code);
    assert_eq!(result.logs, "partial\n");
    assert!(took >= ms(300), "returned too early: {took:?}");
    assert!(took < ms(2000), "returned too late: {took:?}");

    let pid = result.pid.expect("child was spawned");
    assert!(os::wait_until_gone(pid, ms(500)), "pid {pid} still alive");
}

#[test]
fn timeout_reports_configured_sentinel() {
    init_tracing();

    let cfg = commands::sleeper(10)
        .with_timeout(ms(200))
        .with_default_error_code(-9);
    let result = run_blocking(&cfg);

    assert!(matches!(result.fault, Some(ProcrunError::Timeout(_))));
    assert_eq!(result.exit_code, -9);
    assert!(result.folded_logs().starts_with("error: process timed out after"));
}

#[test]
fn invalid_working_directory_never_spawns() {
    init_tracing();

    let controller = LifecycleController::with_spawner(CountingSpawner::new());
    let cfg = commands::print_then_exit("never", 0)
        .with_working_directory("/definitely/not/here")
        .with_default_error_code(-42);

    let result = controller.run_blocking(&cfg);

    assert!(matches!(
        result.fault,
        Some(ProcrunError::InvalidWorkingDirectory(_))
    ));
    assert_eq!(result.exit_code, -42);
    assert!(result.logs.is_empty());
    assert!(result.pid.is_none());
    assert_eq!(controller.state(), RunState::Failed);
}

#[test]
fn invalid_working_directory_counts_zero_attempts() {
    init_tracing();

    let spawner = Arc::new(CountingSpawner::new());
    let controller = LifecycleController::with_spawner(Arc::clone(&spawner));
    let file = tempfile::NamedTempFile::new().unwrap();

    let cfg = commands::print_then_exit("never", 0).with_working_directory(file.path());
    let result = controller.run_blocking(&cfg);

    assert!(matches!(
        result.fault,
        Some(ProcrunError::InvalidWorkingDirectory(_))
    ));
    assert_eq!(spawner.attempts(), 0);

    // The same controller is still usable afterwards.
    let result = controller.run_blocking(&commands::print_then_exit("ok", 0));
    assert_eq!(result.logs, "ok");
    assert_eq!(spawner.attempts(), 1);
    assert_eq!(controller.state(), RunState::Completed);
}

#[test]
fn missing_program_is_a_spawn_failure() {
    init_tracing();

    let cfg = ProcessConfig::argv(["procrun-no-such-program-4f1c"]);
    let result = run_blocking(&cfg);

    assert!(matches!(result.fault, Some(ProcrunError::SpawnFailed(_))));
    assert_eq!(result.exit_code, cfg.default_error_code);
    assert!(result.pid.is_none());
}

#[test]
fn runs_in_the_configured_directory() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let expected = dir.path().canonicalize().unwrap();

    let cfg = ProcessConfig::shell("pwd -P").with_working_directory(dir.path());
    let result = run_blocking(&cfg);

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.logs.trim_end(), expected.to_string_lossy());
}

#[test]
fn environment_forces_utf8_and_applies_overrides() {
    init_tracing();

    let probe = r#"printf '%s|%s' "$PYTHONIOENCODING" "$GREETING""#;

    let result = run_blocking(&ProcessConfig::shell(probe).with_env("GREETING", "hi"));
    assert_eq!(result.logs, "utf8|hi");

    let result = run_blocking(
        &ProcessConfig::shell(probe)
            .with_force_utf8(false)
            .with_env("GREETING", "hi"),
    );
    assert_eq!(result.logs, "|hi");
}

#[test]
fn input_is_written_to_stdin_and_closed() {
    init_tracing();

    let result = run_blocking(&commands::cat_stdin(b"line one\nline two\n"));

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.logs, "line one\nline two\n");
}

#[test]
fn multi_byte_text_survives_chunking() {
    init_tracing();

    let text = "héllo wörld ✓ 日本語";
    let result = run_blocking(&ProcessConfig::shell(format!("printf '%s' '{text}'")));

    assert_eq!(result.logs, text);
}

#[test]
fn output_larger_than_one_chunk_is_complete() {
    init_tracing();

    let cfg = ProcessConfig::shell("head -c 100000 /dev/zero | tr '\\0' a");
    let result = run_blocking(&cfg);

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.logs.len(), 100_000);
    assert!(result.logs.bytes().all(|b| b == b'a'));
}

#[test]
fn signal_death_maps_to_128_plus_signal() {
    init_tracing();

    let result = run_blocking(&ProcessConfig::shell("kill -9 $$"));

    assert!(result.fault.is_none());
    assert_eq!(result.exit_code, 128 + 9);
}

#[test]
fn stop_from_another_thread_cancels() {
    init_tracing();

    let controller = Arc::new(LifecycleController::new());
    let stop = controller.stop_handle();
    let cfg = commands::sleeper(10).with_poll_interval(ms(1000));

    let stopper = thread::spawn(move || {
        thread::sleep(ms(200));
        stop.stop();
    });

    let started = Instant::now();
    let result = controller.run_blocking(&cfg);
    let took = started.elapsed();
    stopper.join().unwrap();

    assert!(matches!(result.fault, Some(ProcrunError::Cancelled)));
    assert_eq!(result.exit_code, cfg.default_error_code);
    assert_eq!(controller.state(), RunState::Cancelled);
    // The condvar wakes the loop long before the 1s poll interval is up.
    assert!(took < Duration::from_millis(900), "stop took {took:?}");

    let pid = result.pid.unwrap();
    assert!(os::wait_until_gone(pid, ms(500)));
}

#[test]
fn interrupt_before_start_spawns_nothing() {
    init_tracing();

    let spawner = Arc::new(CountingSpawner::new());
    let controller = LifecycleController::with_spawner(Arc::clone(&spawner));
    let interrupted = AtomicBool::new(true);

    let cfg = commands::sleeper(10).with_default_error_code(-3);
    let result = controller.run_blocking_unless_interrupted(&cfg, &interrupted);

    assert!(matches!(result.fault, Some(ProcrunError::Cancelled)));
    assert_eq!(result.exit_code, -3);
    assert!(result.pid.is_none());
    assert_eq!(spawner.attempts(), 0);
    assert_eq!(controller.state(), RunState::Idle);

    interrupted.store(false, Ordering::SeqCst);
    let result = controller.run_blocking_unless_interrupted(&commands::print_then_exit("go", 0), &interrupted);
    assert_eq!(result.logs, "go");
    assert_eq!(spawner.attempts(), 1);
}

#[test]
fn interrupt_latched_after_start_cancels() {
    init_tracing();

    let controller = Arc::new(LifecycleController::new());
    let interrupted = Arc::new(AtomicBool::new(false));

    let stop = controller.stop_handle();
    let latch = Arc::clone(&interrupted);
    let interrupter = thread::spawn(move || {
        thread::sleep(ms(150));
        latch.store(true, Ordering::SeqCst);
        stop.stop();
    });

    let cfg = commands::sleeper(10).with_poll_interval(ms(1000));
    let result = controller.run_blocking_unless_interrupted(&cfg, &interrupted);
    interrupter.join().unwrap();

    assert!(matches!(result.fault, Some(ProcrunError::Cancelled)));
    assert!(os::wait_until_gone(result.pid.unwrap(), ms(500)));
}

#[test]
fn timeout_also_kills_background_jobs_of_a_shell_line() {
    init_tracing();

    let cfg = ProcessConfig::shell("sleep 30 & echo $!; wait")
        .with_timeout(ms(300))
        .with_poll_interval(ms(50));

    let started = Instant::now();
    let result = run_blocking(&cfg);

    assert!(matches!(result.fault, Some(ProcrunError::Timeout(_))));
    assert!(started.elapsed() < ms(2000));

    let grandchild: u32 = result.logs.trim().parse().expect("background job pid");
    assert!(
        os::wait_until_gone(grandchild, ms(1000)),
        "background job {grandchild} outlived the timeout"
    );
}
