//! OS probes used to check that executions leave nothing behind.

#[cfg(unix)]
use std::thread;
#[cfg(unix)]
use std::time::{Duration, Instant};

/// Number of open descriptors of the current process, when the platform
/// exposes it.
pub fn open_fd_count() -> Option<usize> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_dir("/proc/self/fd").ok().map(|dir| dir.count())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// True while `pid` is a live process. Zombies count as gone: an orphaned
/// grandchild may wait a while for its new parent to reap it.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // The state letter follows the parenthesised command name.
            let state = stat.rsplit_once(')').and_then(|(_, rest)| rest.trim_start().chars().next());
            return !matches!(state, Some('Z') | Some('X'));
        }
    }
    // Signal 0 only performs the existence check.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Poll `process_alive` until it reports false or `within` elapses.
#[cfg(unix)]
pub fn wait_until_gone(pid: u32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    !process_alive(pid)
}
