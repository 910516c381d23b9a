// src/exec/blocking.rs

//! Synchronous runner: the whole lifecycle on the caller's thread.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ProcessConfig;
use crate::errors::{ProcrunError, Result};

use super::controller::LifecycleController;
use super::handle::Spawner;

/// Outcome of a blocking execution.
///
/// `logs` only ever holds what the child wrote; a runner fault is reported
/// through `fault` and `exit_code` is then the configured sentinel.
#[derive(Debug)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub logs: String,
    pub fault: Option<ProcrunError>,
    /// `None` when no child was spawned.
    pub pid: Option<u32>,
}

impl ExecutionResult {
    /// The child ran to completion and exited with 0.
    pub fn is_success(&self) -> bool {
        self.fault.is_none() && self.exit_code == 0
    }

    /// `(exit_code, logs)` for completed executions, the fault otherwise.
    pub fn into_result(self) -> Result<(i32, String)> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok((self.exit_code, self.logs)),
        }
    }

    /// Single-buffer rendering: child output followed by an
    /// `error: <reason>` line when the runner failed.
    pub fn folded_logs(&self) -> String {
        let mut out = self.logs.clone();
        if let Some(fault) = &self.fault {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            let _ = write!(out, "error: {}", fault);
        }
        out
    }
}

impl<S: Spawner> LifecycleController<S> {
    /// Run `config` to a terminal state on the calling thread.
    ///
    /// Never returns early with an error: every failure, including
    /// `AlreadyRunning`, ends up in [`ExecutionResult::fault`].
    pub fn run_blocking(&self, config: &ProcessConfig) -> ExecutionResult {
        self.run_blocking_unless_interrupted(config, &AtomicBool::new(false))
    }

    /// Like [`run_blocking`](Self::run_blocking), but honours an interrupt
    /// latch that may be set before the child exists.
    ///
    /// A latch already set means nothing is spawned and the result carries
    /// `Cancelled`. A latch set from another thread after the start is seen
    /// either here or by that thread's subsequent `stop()`, provided it sets
    /// the latch before calling `stop()`.
    pub fn run_blocking_unless_interrupted(
        &self,
        config: &ProcessConfig,
        interrupted: &AtomicBool,
    ) -> ExecutionResult {
        if interrupted.load(Ordering::SeqCst) {
            return ExecutionResult {
                exit_code: config.default_error_code,
                logs: String::new(),
                fault: Some(ProcrunError::Cancelled),
                pid: None,
            };
        }

        let handle = match self.start(config) {
            Ok(handle) => handle,
            Err(fault) => {
                return ExecutionResult {
                    exit_code: config.default_error_code,
                    logs: String::new(),
                    fault: Some(fault),
                    pid: None,
                };
            }
        };
        let pid = handle.pid();
        if interrupted.load(Ordering::SeqCst) {
            self.stop();
        }

        let mut logs = String::new();
        let mut collect = |chunk: &str| logs.push_str(chunk);
        let outcome = self.drive(handle, config, &mut collect);

        match outcome {
            Ok(exit_code) => ExecutionResult {
                exit_code,
                logs,
                fault: None,
                pid: Some(pid),
            },
            Err(fault) => ExecutionResult {
                exit_code: config.default_error_code,
                logs,
                fault: Some(fault),
                pid: Some(pid),
            },
        }
    }
}

/// Run `config` with a fresh controller backed by the real OS.
pub fn run_blocking(config: &ProcessConfig) -> ExecutionResult {
    LifecycleController::new().run_blocking(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn folded_logs_appends_fault_after_output() {
        let result = ExecutionResult {
            exit_code: -1,
            logs: "partial".to_string(),
            fault: Some(ProcrunError::Timeout(Duration::from_millis(200))),
            pid: Some(1),
        };
        assert_eq!(result.folded_logs(), "partial\nerror: process timed out after 200ms");
        assert!(!result.is_success());
        assert!(matches!(result.into_result(), Err(ProcrunError::Timeout(_))));
    }

    #[test]
    fn folded_logs_is_plain_output_without_fault() {
        let result = ExecutionResult {
            exit_code: 0,
            logs: "hello\n".to_string(),
            fault: None,
            pid: Some(1),
        };
        assert_eq!(result.folded_logs(), "hello\n");
        assert!(result.is_success());
        assert_eq!(result.into_result().unwrap(), (0, "hello\n".to_string()));
    }
}
