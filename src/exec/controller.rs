// src/exec/controller.rs

//! Lifecycle controller: spawn, pump until exit, tear down.
//!
//! ```text
//! Idle -> Spawning -> Running -> { Completed | TimedOut | Cancelled | Failed }
//! ```
//!
//! The running loop ("tick") feeds pending stdin, drains output, queries the
//! exit status and then waits on a condition variable for at most one poll
//! interval. [`LifecycleController::stop`] flips a flag under the same mutex
//! and notifies the condvar, so a waiting loop wakes up immediately. The
//! process handle itself is only ever touched by the thread driving the
//! loop; `stop` never kills anything directly.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::ProcessConfig;
use crate::errors::{ProcrunError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::RunState;

use super::handle::{exit_code_of, OsSpawner, ProcessHandle, Spawner};
use super::pump::OutputPump;

#[derive(Debug, Default)]
struct StateInner {
    state: RunState,
    started_at: Option<Instant>,
    stop_requested: bool,
}

/// State shared between the driving thread and `stop()` callers.
#[derive(Debug, Default)]
pub struct ExecutionState {
    inner: Mutex<StateInner>,
    wake: Condvar,
}

impl ExecutionState {
    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Time since the current execution entered `Running`.
    pub fn elapsed(&self) -> Option<Duration> {
        self.lock().started_at.map(|t| t.elapsed())
    }

    /// Returns false when there was nothing to stop or a stop was already
    /// pending.
    fn request_stop(&self) -> bool {
        let mut inner = self.lock();
        if !inner.state.is_active() || inner.stop_requested {
            return false;
        }
        inner.stop_requested = true;
        drop(inner);
        self.wake.notify_all();
        true
    }
}

/// Cloneable, thread-safe handle that can only stop executions.
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<ExecutionState>,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.shared.request_stop() {
            info!("stop requested");
        }
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }
}

/// Drives one execution at a time through the state machine.
pub struct LifecycleController<S: Spawner = OsSpawner> {
    spawner: S,
    fs: Arc<dyn FileSystem>,
    shared: Arc<ExecutionState>,
}

impl<S: Spawner> std::fmt::Debug for LifecycleController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("fs", &self.fs)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl LifecycleController<OsSpawner> {
    pub fn new() -> Self {
        Self::with_spawner(OsSpawner)
    }
}

impl Default for LifecycleController<OsSpawner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Spawner> LifecycleController<S> {
    pub fn with_spawner(spawner: S) -> Self {
        Self {
            spawner,
            fs: Arc::new(RealFileSystem),
            shared: Arc::new(ExecutionState::default()),
        }
    }

    /// Replace the filesystem used to validate working directories.
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.shared.elapsed()
    }

    /// Request cancellation of the current execution.
    ///
    /// Idempotent and callable from any thread. Returns immediately; the
    /// driving thread terminates the child and tears down.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// `Idle`/terminal -> `Spawning` -> `Running`.
    ///
    /// Fails with `AlreadyRunning` without touching any OS state when an
    /// execution is in flight. Validation and spawn failures leave the
    /// controller in `Failed`.
    pub fn start(&self, config: &ProcessConfig) -> Result<ProcessHandle> {
        self.begin()?;

        match self.spawn_checked(config) {
            Ok(handle) => {
                let mut inner = self.shared.lock();
                inner.state = RunState::Running;
                inner.started_at = Some(Instant::now());
                debug!(pid = handle.pid(), "execution running");
                Ok(handle)
            }
            Err(err) => {
                error!(error = %err, command = %config.command, "failed to start execution");
                self.finish(RunState::Failed);
                Err(err)
            }
        }
    }

    /// `Running` -> terminal. Consumes the handle and releases it exactly
    /// once, whichever terminal state is reached.
    ///
    /// Returns the child's exit code, or the fault that ended the execution.
    pub fn drive(
        &self,
        mut handle: ProcessHandle,
        config: &ProcessConfig,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<i32> {
        let mut pump = OutputPump::new();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_loop(&mut handle, config, &mut pump, on_chunk)
        }));

        handle.close();

        match outcome {
            Ok(result) => {
                let terminal = match &result {
                    Ok(_) => RunState::Completed,
                    Err(ProcrunError::Timeout(_)) => RunState::TimedOut,
                    Err(ProcrunError::Cancelled) => RunState::Cancelled,
                    Err(_) => RunState::Failed,
                };
                self.finish(terminal);
                result
            }
            Err(payload) => {
                self.finish(RunState::Failed);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Mark a started execution as failed when its handle was lost before
    /// `drive` could take it over.
    pub(crate) fn abandon(&self) {
        self.finish(RunState::Failed);
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        if inner.state.is_active() {
            debug!(state = %inner.state, "rejecting start; execution in flight");
            return Err(ProcrunError::AlreadyRunning);
        }
        inner.state = RunState::Spawning;
        inner.started_at = None;
        inner.stop_requested = false;
        Ok(())
    }

    fn spawn_checked(&self, config: &ProcessConfig) -> Result<ProcessHandle> {
        let dir = &config.working_directory;
        if !self.fs.is_dir(dir) {
            let reason = if self.fs.exists(dir) {
                "not a directory"
            } else {
                "does not exist"
            };
            warn!(cwd = %dir.display(), reason, "rejecting working directory");
            return Err(ProcrunError::InvalidWorkingDirectory(dir.clone()));
        }
        self.spawner.spawn(config)
    }

    fn finish(&self, terminal: RunState) {
        let mut inner = self.shared.lock();
        inner.state = terminal;
        inner.stop_requested = false;
        let elapsed_ms = inner.started_at.map(|t| t.elapsed().as_millis());
        drop(inner);
        self.shared.wake.notify_all();
        debug!(state = %terminal, ?elapsed_ms, "execution finished");
    }

    fn run_loop(
        &self,
        handle: &mut ProcessHandle,
        config: &ProcessConfig,
        pump: &mut OutputPump,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<i32> {
        let pid = handle.pid();

        loop {
            handle.feed_input().map_err(ProcrunError::OsQueryFailed)?;
            pump_output(handle, pump, on_chunk, false)?;

            match handle.try_wait() {
                Ok(Some(status)) => {
                    // Output written right before exit is still in the pipe.
                    pump_output(handle, pump, on_chunk, true)?;
                    let code = exit_code_of(status, config.default_error_code);
                    info!(pid, exit_code = code, "child process exited");
                    return Ok(code);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(pid, error = %e, "querying child exit status failed");
                    return Err(ProcrunError::OsQueryFailed(e));
                }
            }

            let (stop_requested, elapsed) = self.wait_tick(config);

            if stop_requested {
                terminate(handle);
                pump_output(handle, pump, on_chunk, true)?;
                info!(pid, elapsed_ms = elapsed.as_millis(), "execution cancelled");
                return Err(ProcrunError::Cancelled);
            }

            if let Some(timeout) = config.timeout {
                if elapsed >= timeout {
                    terminate(handle);
                    pump_output(handle, pump, on_chunk, true)?;
                    warn!(
                        pid,
                        elapsed_ms = elapsed.as_millis(),
                        timeout_ms = timeout.as_millis(),
                        "child process timed out"
                    );
                    return Err(ProcrunError::Timeout(elapsed));
                }
            }
        }
    }

    /// Wait for one poll interval, a stop request, or the timeout deadline,
    /// whichever comes first.
    fn wait_tick(&self, config: &ProcessConfig) -> (bool, Duration) {
        let inner = self.shared.lock();
        let started_at = inner.started_at.unwrap_or_else(Instant::now);

        let mut wait = config.poll_interval;
        if let Some(timeout) = config.timeout {
            wait = wait.min(timeout.saturating_sub(started_at.elapsed()));
        }

        let (inner, _) = self
            .shared
            .wake
            .wait_timeout_while(inner, wait, |s| !s.stop_requested)
            .unwrap_or_else(PoisonError::into_inner);

        (inner.stop_requested, started_at.elapsed())
    }
}

/// Drain available output and forward it as one chunk.
///
/// `final_drain` also flushes bytes the decoder held back.
fn pump_output(
    handle: &mut ProcessHandle,
    pump: &mut OutputPump,
    on_chunk: &mut dyn FnMut(&str),
    final_drain: bool,
) -> Result<()> {
    let drained = match handle.output_mut() {
        Some(output) => Some(pump.drain(output).map_err(ProcrunError::OsQueryFailed)?),
        None => None,
    };

    let mut text = String::new();
    if let Some(drained) = drained {
        if drained.end_of_stream {
            handle.close_output();
        }
        text = drained.text;
    }
    if final_drain {
        text.push_str(&pump.finish());
    }

    if !text.is_empty() {
        on_chunk(&text);
    }
    Ok(())
}

fn terminate(handle: &mut ProcessHandle) {
    if let Err(e) = handle.terminate() {
        warn!(pid = handle.pid(), error = %e, "failed to terminate child process");
    }
}
