//! Ready-made child commands for tests. All of them assume a POSIX `sh`.

use std::time::Duration;

use procrun::config::ProcessConfig;

/// Writes `text` verbatim (no trailing newline) and exits with `code`.
pub fn print_then_exit(text: &str, code: i32) -> ProcessConfig {
    ProcessConfig::shell(format!("printf '%s' '{}'; exit {}", text.replace('\'', r"'\''"), code))
}

/// Writes one line to stdout and one to stderr.
pub fn stdout_and_stderr() -> ProcessConfig {
    ProcessConfig::shell("echo out; echo err 1>&2")
}

/// A child that stays alive for `secs` seconds. Spawned without a shell so
/// the pid is the sleeping process itself.
pub fn sleeper(secs: u32) -> ProcessConfig {
    ProcessConfig::argv(["sleep".to_string(), secs.to_string()])
}

/// Prints `first`, then sleeps for a long time.
pub fn print_then_hang(first: &str) -> ProcessConfig {
    ProcessConfig::shell(format!("printf '%s\\n' '{first}'; exec sleep 30"))
}

/// Prints `count` numbered lines, pausing `gap` between them.
pub fn numbered_lines(count: u32, gap: Duration) -> ProcessConfig {
    let secs = gap.as_secs_f64();
    ProcessConfig::shell(format!(
        "i=1; while [ $i -le {count} ]; do echo line-$i; sleep {secs}; i=$((i+1)); done"
    ))
}

/// Echoes stdin back to stdout.
pub fn cat_stdin(input: &[u8]) -> ProcessConfig {
    ProcessConfig::argv(["cat"]).with_input(input.to_vec())
}
