// src/exec/handle.rs

//! Spawning children and owning their OS resources.
//!
//! A [`ProcessHandle`] owns exactly what the parent has to manage after a
//! spawn: the child itself, the read end of the output transport and,
//! optionally, the write end of the input transport. The endpoints handed to
//! the child are closed in the parent as part of spawning.

use std::io::{self, Write};
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{debug, info, warn};

use crate::config::{CommandLine, ProcessConfig};
use crate::errors::{ProcrunError, Result};

use super::pipe::{self, ReadEnd, WriteEnd};

/// Trait abstracting how children are launched.
///
/// Production code uses [`OsSpawner`]; tests can wrap it to count or refuse
/// spawn attempts.
pub trait Spawner: Send + Sync {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessHandle>;
}

/// Spawner backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

impl Spawner for OsSpawner {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessHandle> {
        spawn_process(config)
    }
}

impl<S: Spawner + ?Sized> Spawner for std::sync::Arc<S> {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessHandle> {
        (**self).spawn(config)
    }
}

/// Launch `config.command` with stdout and stderr merged into one pipe.
///
/// Every endpoint created before a failure is dropped (and thereby closed)
/// before the error is returned.
pub fn spawn_process(config: &ProcessConfig) -> Result<ProcessHandle> {
    let output = pipe::create().map_err(ProcrunError::SpawnFailed)?;
    let reader = ReadEnd::new(output.read).map_err(ProcrunError::SpawnFailed)?;
    let stderr_writer = output.write.try_clone().map_err(ProcrunError::SpawnFailed)?;

    let input = match &config.input {
        Some(bytes) => {
            let transport = pipe::create().map_err(ProcrunError::SpawnFailed)?;
            let writer = WriteEnd::new(transport.write).map_err(ProcrunError::SpawnFailed)?;
            Some((transport.read, InputFeed::new(writer, bytes.clone())))
        }
        None => None,
    };

    let mut command = build_command(config);
    command
        .stdout(Stdio::from(output.write))
        .stderr(Stdio::from(stderr_writer));

    let input = match input {
        Some((child_end, feed)) => {
            command.stdin(Stdio::from(child_end));
            Some(feed)
        }
        None => {
            command.stdin(Stdio::null());
            None
        }
    };

    let spawned = command.spawn();
    // `Command` keeps the child's endpoints alive; holding them would leak
    // them and hide end-of-stream from the pump.
    drop(command);

    let child = spawned.map_err(ProcrunError::SpawnFailed)?;
    let pid = child.id();

    info!(
        pid,
        program = %config.command.program(),
        cwd = %config.working_directory.display(),
        "spawned child process"
    );

    Ok(ProcessHandle {
        pid,
        child: Some(child),
        output: Some(reader),
        input,
        exit_status: None,
    })
}

fn build_command(config: &ProcessConfig) -> Command {
    let mut cmd = match &config.command {
        CommandLine::Shell(line) => {
            if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(line);
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-c").arg(line);
                c
            }
        }
        CommandLine::Argv(args) => {
            let (program, rest) = match args.split_first() {
                Some((program, rest)) => (program.as_str(), rest),
                None => ("", &[][..]),
            };
            let mut c = Command::new(program);
            c.args(rest);
            c
        }
    };

    cmd.current_dir(&config.working_directory)
        .envs(config.effective_env());

    // Own process group, so termination also reaches whatever the child
    // started (a shell line's pipeline, background jobs).
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        use windows_sys::Win32::System::Threading::CREATE_NO_WINDOW;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd
}

/// Owns one spawned child and the parent-side transport endpoints.
///
/// Every resource is either open or already released (`None`). [`close`]
/// is idempotent and also runs on drop, so a handle can be abandoned at any
/// point without leaking descriptors or leaving an unreaped child.
///
/// [`close`]: ProcessHandle::close
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Option<Child>,
    output: Option<ReadEnd>,
    input: Option<InputFeed>,
    exit_status: Option<ExitStatus>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Read end of the combined stdout/stderr transport, until it has been
    /// closed.
    pub fn output_mut(&mut self) -> Option<&mut ReadEnd> {
        self.output.as_mut()
    }

    pub fn close_output(&mut self) {
        if self.output.take().is_some() {
            debug!(pid = self.pid, "output transport closed");
        }
    }

    /// True while input bytes are still waiting to be written.
    pub fn has_pending_input(&self) -> bool {
        self.input.is_some()
    }

    /// Write as much pending input as the pipe accepts without blocking.
    ///
    /// Once everything is written the write end is closed so the child sees
    /// end-of-file. A child that closed its stdin early is not an error.
    pub fn feed_input(&mut self) -> io::Result<()> {
        let Some(feed) = self.input.as_mut() else {
            return Ok(());
        };

        match feed.write_available() {
            Ok(true) => {
                debug!(pid = self.pid, bytes = feed.data.len(), "input fully written; closing stdin");
                self.input = None;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(pid = self.pid, "child closed stdin before reading all input");
                self.input = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Non-blocking exit query. Once an exit status has been observed it is
    /// returned again without touching the OS.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let Some(child) = self.child.as_mut() else {
            return Err(io::Error::other("process handle already closed"));
        };
        let status = child.try_wait()?;
        self.exit_status = status;
        Ok(status)
    }

    /// Forcibly terminate the child and reap it.
    ///
    /// On Unix the child's whole process group is killed, so grandchildren
    /// holding the output pipe go with it. A child that already exited on
    /// its own is only reaped.
    pub fn terminate(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let Some(child) = self.child.as_mut() else {
            return Err(io::Error::other("process handle already closed"));
        };

        #[cfg(unix)]
        kill_process_group(self.pid);

        match child.kill() {
            Ok(()) => {}
            // Already exited but not yet reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }

        let status = child.wait()?;
        self.exit_status = Some(status);
        info!(pid = self.pid, ?status, "child process terminated");
        Ok(status)
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Release every resource this handle owns. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.input = None;
        self.output = None;

        if self.child.is_some() && self.exit_status.is_none() {
            if let Err(e) = self.terminate() {
                warn!(pid = self.pid, error = %e, "failed to terminate child during teardown");
            }
        }
        if self.child.take().is_some() {
            debug!(pid = self.pid, "process handle closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.child.is_none() && self.output.is_none() && self.input.is_none()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// SIGKILL to the group led by `pid`. The unreaped child keeps the group id
/// reserved, so it cannot name an unrelated group.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %err, "failed to kill process group");
        }
    }
}

/// Pending stdin bytes plus the write end they go through.
#[derive(Debug)]
struct InputFeed {
    writer: WriteEnd,
    data: Vec<u8>,
    written: usize,
}

impl InputFeed {
    fn new(writer: WriteEnd, data: Vec<u8>) -> Self {
        Self {
            writer,
            data,
            written: 0,
        }
    }

    /// `Ok(true)` once every byte has been written.
    fn write_available(&mut self) -> io::Result<bool> {
        while self.written < self.data.len() {
            match self.writer.write(&self.data[self.written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

/// Map an exit status to the integer reported to callers.
///
/// Unix deaths by signal are reported as `128 + signal`, the shell
/// convention. Anything else without a code falls back to `fallback`.
pub fn exit_code_of(status: ExitStatus, fallback: i32) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    fallback
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_exit(handle: &mut ProcessHandle) -> ExitStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(status) = handle.try_wait().unwrap() {
                return status;
            }
            assert!(Instant::now() < deadline, "child did not exit");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn spawn_merges_stderr_into_output() {
        let cfg = ProcessConfig::shell("printf out; printf err 1>&2");
        let mut handle = spawn_process(&cfg).unwrap();
        let status = wait_for_exit(&mut handle);
        assert_eq!(exit_code_of(status, -1), 0);

        let mut pump = super::super::pump::OutputPump::new();
        let drained = pump.drain(handle.output_mut().unwrap()).unwrap();
        assert_eq!(drained.text, "outerr");
        assert!(drained.end_of_stream);
    }

    #[test]
    fn close_is_idempotent_and_kills_running_child() {
        let cfg = ProcessConfig::argv(["sleep", "10"]);
        let mut handle = spawn_process(&cfg).unwrap();
        assert!(!handle.is_closed());

        handle.close();
        assert!(handle.is_closed());
        assert!(handle.exit_status().is_some());
        handle.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn input_is_fed_and_closed() {
        let cfg = ProcessConfig::argv(["cat"]).with_input("ping");
        let mut handle = spawn_process(&cfg).unwrap();
        assert!(handle.has_pending_input());
        handle.feed_input().unwrap();
        assert!(!handle.has_pending_input());

        wait_for_exit(&mut handle);
        let mut pump = super::super::pump::OutputPump::new();
        let drained = pump.drain(handle.output_mut().unwrap()).unwrap();
        assert_eq!(drained.text, "ping");
    }

    #[test]
    fn missing_program_is_spawn_failure() {
        let cfg = ProcessConfig::argv(["/definitely/not/a/program"]);
        let err = spawn_process(&cfg).unwrap_err();
        assert!(matches!(err, ProcrunError::SpawnFailed(_)));
    }

    #[test]
    fn signal_deaths_use_shell_convention() {
        let cfg = ProcessConfig::argv(["sleep", "10"]);
        let mut handle = spawn_process(&cfg).unwrap();
        let status = handle.terminate().unwrap();
        assert_eq!(exit_code_of(status, -1), 128 + libc::SIGKILL);
    }
}
