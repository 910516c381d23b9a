// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod types;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, validate_config, CommandLine, ProcessConfig};
use crate::exec::{BackgroundRunner, LifecycleController, StopHandle};

pub use crate::errors::ProcrunError;
pub use crate::exec::{run_blocking, ExecutionResult, ExitReport};
pub use crate::types::RunState;

/// High-level entry point used by `main.rs`.
///
/// Resolves the configuration from the job file and flags, runs the child
/// (blocking or streaming), wires Ctrl-C to `stop()`, and returns the exit
/// code `procrun` itself should exit with.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config = resolve_config(&args)?;

    if args.dry_run {
        print_dry_run(&config);
        return Ok(0);
    }

    if args.stream {
        run_streaming(config).await
    } else {
        run_to_completion(config).await
    }
}

/// Merge the optional job file with command-line overrides.
pub fn resolve_config(args: &CliArgs) -> Result<ProcessConfig> {
    let command = command_from_args(args);

    let mut config = match (&args.config, command) {
        (Some(path), command) => {
            let mut cfg = load_and_validate(path)
                .with_context(|| format!("loading job file {:?}", path))?;
            if let Some(command) = command {
                cfg.command = command;
            }
            cfg
        }
        (None, Some(command)) => ProcessConfig::new(command),
        (None, None) => bail!("no command given; pass one after `--` or use --config"),
    };

    if let Some(cwd) = &args.cwd {
        config.working_directory = cwd.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout = Some(timeout);
    }
    if let Some(code) = args.default_error_code {
        config.default_error_code = code;
    }
    if let Some(interval) = args.poll_interval {
        config.poll_interval = interval;
    }
    if args.no_utf8 {
        config.force_utf8 = false;
    }
    for (key, value) in &args.env {
        config.env.insert(key.clone(), value.clone());
    }

    validate_config(&config)?;
    debug!(?config, "resolved configuration");
    Ok(config)
}

fn command_from_args(args: &CliArgs) -> Option<CommandLine> {
    if args.command.is_empty() {
        return None;
    }
    Some(if args.shell {
        CommandLine::Shell(args.command.join(" "))
    } else {
        CommandLine::Argv(args.command.clone())
    })
}

async fn run_to_completion(config: ProcessConfig) -> Result<i32> {
    let controller = Arc::new(LifecycleController::new());
    let interrupted = stop_on_ctrl_c(controller.stop_handle());

    let worker = Arc::clone(&controller);
    let result = tokio::task::spawn_blocking(move || {
        worker.run_blocking_unless_interrupted(&config, &interrupted)
    })
    .await
    .context("blocking runner task failed")?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.logs.as_bytes())?;
    stdout.flush()?;

    if let Some(fault) = &result.fault {
        eprintln!("error: {fault}");
    }
    info!(exit_code = result.exit_code, "procrun finished");
    Ok(result.exit_code)
}

async fn run_streaming(config: ProcessConfig) -> Result<i32> {
    let runner = BackgroundRunner::new();
    let interrupted = stop_on_ctrl_c(runner.stop_handle());

    if interrupted.load(Ordering::SeqCst) {
        eprintln!("error: {}", ProcrunError::Cancelled);
        return Ok(config.default_error_code);
    }

    let (exit_tx, exit_rx) = oneshot::channel::<ExitReport>();
    runner.run_async(
        config,
        |chunk| {
            let mut stdout = std::io::stdout().lock();
            // A closed stdout must not take the execution down with it.
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        },
        move |report| {
            let _ = exit_tx.send(report);
        },
    )?;
    // Ctrl-C between the check above and the start found nothing to stop.
    if interrupted.load(Ordering::SeqCst) {
        runner.stop();
    }

    let report = exit_rx.await.context("background execution vanished")?;
    tokio::task::spawn_blocking(move || runner.join())
        .await
        .context("joining background execution")?;

    if let Some(fault) = &report.fault {
        eprintln!("error: {fault}");
    }
    info!(exit_code = report.exit_code, "procrun finished");
    Ok(report.exit_code)
}

/// Ctrl-C -> cooperative cancellation of the running child.
///
/// The returned latch stays set after the first Ctrl-C so a child that was
/// not started yet never is.
fn stop_on_ctrl_c(stop: StopHandle) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let latch = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("Ctrl-C received; stopping child");
        latch.store(true, Ordering::SeqCst);
        stop.stop();
    });
    interrupted
}

/// Simple dry-run output: print the resolved configuration.
fn print_dry_run(config: &ProcessConfig) {
    println!("procrun dry-run");
    match &config.command {
        CommandLine::Shell(line) => println!("  command (shell): {line}"),
        CommandLine::Argv(args) => println!("  command (argv): {:?}", args),
    }
    println!("  working_directory: {}", config.working_directory.display());
    match config.timeout {
        Some(timeout) => println!("  timeout: {}ms", timeout.as_millis()),
        None => println!("  timeout: none"),
    }
    println!("  default_error_code: {}", config.default_error_code);
    println!("  poll_interval: {}ms", config.poll_interval.as_millis());
    for (key, value) in config.effective_env() {
        println!("  env: {key}={value}");
    }
    if let Some(input) = &config.input {
        println!("  input: {} bytes", input.len());
    }

    debug!("dry-run complete (no execution)");
}
