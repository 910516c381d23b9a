// src/exec/background.rs

//! Asynchronous runner: the running loop on a dedicated background thread.
//!
//! Validation and spawn still happen on the caller's thread, so those errors
//! come back from [`BackgroundRunner::run_async`] directly. From then on the
//! process handle belongs to the background thread, which delivers output
//! through `on_chunk` and finishes with exactly one `on_exit`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use tracing::{debug, error, warn};

use crate::config::ProcessConfig;
use crate::errors::{ProcrunError, Result};
use crate::types::RunState;

use super::controller::{LifecycleController, StopHandle};
use super::handle::{OsSpawner, Spawner};

/// Terminal report handed to `on_exit`.
#[derive(Debug)]
pub struct ExitReport {
    pub pid: u32,
    /// Real exit code, or the configured sentinel when `fault` is set.
    pub exit_code: i32,
    pub fault: Option<ProcrunError>,
}

impl ExitReport {
    pub fn is_success(&self) -> bool {
        self.fault.is_none() && self.exit_code == 0
    }
}

/// Runs executions of one controller in the background, one at a time.
pub struct BackgroundRunner<S: Spawner + 'static = OsSpawner> {
    controller: Arc<LifecycleController<S>>,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Spawner + 'static> std::fmt::Debug for BackgroundRunner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRunner")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl BackgroundRunner<OsSpawner> {
    pub fn new() -> Self {
        Self::with_controller(LifecycleController::new())
    }
}

impl Default for BackgroundRunner<OsSpawner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Spawner + 'static> BackgroundRunner<S> {
    pub fn with_controller(controller: LifecycleController<S>) -> Self {
        Self {
            controller: Arc::new(controller),
            active: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &LifecycleController<S> {
        &self.controller
    }

    pub fn state(&self) -> RunState {
        self.controller.state()
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    /// Start `config` and return as soon as the child is running.
    ///
    /// - `on_chunk` receives each non-empty drain, in output order, at most
    ///   once per tick.
    /// - `on_exit` is invoked exactly once, after the final drain, even when
    ///   `on_chunk` panics.
    ///
    /// Errors (`AlreadyRunning`, `InvalidWorkingDirectory`, `SpawnFailed`)
    /// are returned here and neither callback is invoked. A previous
    /// execution that already finished is joined first.
    pub fn run_async<C, E>(&self, config: ProcessConfig, mut on_chunk: C, on_exit: E) -> Result<()>
    where
        C: FnMut(&str) + Send + 'static,
        E: FnOnce(ExitReport) + Send + 'static,
    {
        let previous = {
            let mut active = self.lock_active();
            if self.controller.state().is_active() {
                return Err(ProcrunError::AlreadyRunning);
            }
            active.take()
        };
        if let Some(previous) = previous {
            reap(previous);
        }

        let stale = {
            let mut active = self.lock_active();
            let handle = self.controller.start(&config)?;
            let pid = handle.pid();
            let controller = Arc::clone(&self.controller);

            let spawned = thread::Builder::new()
                .name(format!("procrun-{pid}"))
                .spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        controller.drive(handle, &config, &mut on_chunk)
                    }))
                    .unwrap_or_else(|_| {
                        error!(pid, "output consumer panicked");
                        Err(ProcrunError::Other(anyhow!("output consumer panicked")))
                    });
                    let report = match outcome {
                        Ok(exit_code) => ExitReport {
                            pid,
                            exit_code,
                            fault: None,
                        },
                        Err(fault) => ExitReport {
                            pid,
                            exit_code: config.default_error_code,
                            fault: Some(fault),
                        },
                    };
                    debug!(pid, exit_code = report.exit_code, "background execution finished");
                    on_exit(report);
                });

            match spawned {
                Ok(thread) => active.replace(thread),
                Err(e) => {
                    // The closure, and the process handle inside it, were
                    // dropped by the failed spawn; the child is gone.
                    self.controller.abandon();
                    return Err(ProcrunError::SpawnFailed(e));
                }
            }
        };
        if let Some(stale) = stale {
            reap(stale);
        }

        Ok(())
    }

    /// Request cancellation of the current execution. See
    /// [`LifecycleController::stop`].
    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.controller.stop_handle()
    }

    /// Wait for the current background thread, including its `on_exit`.
    pub fn join(&self) {
        let current = self.lock_active().take();
        if let Some(current) = current {
            reap(current);
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Spawner + 'static> Drop for BackgroundRunner<S> {
    fn drop(&mut self) {
        self.controller.stop();
        self.join();
    }
}

/// Join a finished (or finishing) background thread.
///
/// Called from inside that very thread (an `on_exit` that starts the next
/// execution) the handle is detached instead.
fn reap(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        warn!("background execution thread panicked");
    }
}
