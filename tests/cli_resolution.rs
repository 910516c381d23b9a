// tests/cli_resolution.rs

mod common;
use crate::common::{init_tracing, ms};

use std::fs;

use clap::Parser;
use tempfile::tempdir;

use procrun::cli::CliArgs;
use procrun::config::CommandLine;
use procrun::resolve_config;

fn args(argv: &[&str]) -> CliArgs {
    let mut full = vec!["procrun"];
    full.extend_from_slice(argv);
    CliArgs::try_parse_from(full).unwrap()
}

#[test]
fn trailing_command_becomes_argv_or_shell_line() {
    init_tracing();

    let cfg = resolve_config(&args(&["--", "ls", "-la"])).unwrap();
    assert_eq!(cfg.command, CommandLine::argv(["ls", "-la"]));

    let cfg = resolve_config(&args(&["--shell", "--", "echo", "hi", "&&", "exit", "3"])).unwrap();
    assert_eq!(cfg.command, CommandLine::shell("echo hi && exit 3"));
}

#[test]
fn flags_override_job_file_values() {
    init_tracing();

    let root = tempdir().unwrap();
    let job = root.path().join("job.toml");
    fs::write(
        &job,
        r#"
command = "echo from-file"
timeout = "10s"
default_error_code = 7

[env]
MODE = "file"
"#,
    )
    .unwrap();

    let job_path = job.to_string_lossy().to_string();
    let cfg = resolve_config(&args(&[
        "--config",
        &job_path,
        "--timeout",
        "250ms",
        "--env",
        "MODE=cli",
        "--no-utf8",
    ]))
    .unwrap();

    assert_eq!(cfg.command, CommandLine::shell("echo from-file"));
    assert_eq!(cfg.timeout, Some(ms(250)));
    assert_eq!(cfg.default_error_code, 7);
    assert_eq!(cfg.env.get("MODE").map(String::as_str), Some("cli"));
    assert!(!cfg.force_utf8);
    assert_eq!(cfg.working_directory, root.path());

    let cfg = resolve_config(&args(&["--config", &job_path, "--", "true"])).unwrap();
    assert_eq!(cfg.command, CommandLine::argv(["true"]));
}

#[test]
fn missing_command_is_an_error() {
    init_tracing();

    let err = resolve_config(&args(&["--timeout", "1s"])).unwrap_err();
    assert!(err.to_string().contains("no command"));
}

#[test]
fn zero_poll_interval_is_rejected() {
    init_tracing();

    let err = resolve_config(&args(&["--poll-interval", "0ms", "--", "true"])).unwrap_err();
    assert!(err.to_string().contains("poll_interval"));
}
