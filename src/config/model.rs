// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Exit code reported when no real exit code can be obtained.
pub const DEFAULT_ERROR_CODE: i32 = -1;

/// Interval between two ticks of the running loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to launch.
///
/// In a job file a plain string maps to `Shell`, an array to `Argv`:
///
/// ```toml
/// command = "echo hello && exit 3"
/// # or
/// command = ["python", "build.py", "--release"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    /// A single command line handed to the platform shell
    /// (`sh -c` / `cmd /C`).
    ///
    /// On timeout or stop the shell's process group is killed on Unix,
    /// background jobs included. On Windows only the shell itself is
    /// terminated; processes it started may outlive it.
    Shell(String),
    /// Program followed by its arguments, spawned without a shell.
    Argv(Vec<String>),
}

impl CommandLine {
    pub fn shell(line: impl Into<String>) -> Self {
        CommandLine::Shell(line.into())
    }

    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::Argv(args.into_iter().map(Into::into).collect())
    }

    /// Program name used in logs.
    pub fn program(&self) -> &str {
        match self {
            CommandLine::Shell(_) => {
                if cfg!(windows) {
                    "cmd"
                } else {
                    "sh"
                }
            }
            CommandLine::Argv(args) => args.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CommandLine::Shell(line) => line.trim().is_empty(),
            CommandLine::Argv(args) => args.first().is_none_or(|p| p.trim().is_empty()),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Shell(line) => f.write_str(line),
            CommandLine::Argv(args) => f.write_str(&args.join(" ")),
        }
    }
}

/// Per-invocation configuration. Read-only for the lifetime of one
/// execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    pub command: CommandLine,

    /// Must exist and be a directory; checked before anything is spawned.
    pub working_directory: PathBuf,

    /// `None` means the child may run forever.
    pub timeout: Option<Duration>,

    /// Reported instead of a real exit code on spawn failure, timeout,
    /// cancellation or OS query failure.
    pub default_error_code: i32,

    /// Force UTF-8 on the child's standard streams (`PYTHONIOENCODING=utf8`).
    pub force_utf8: bool,

    /// Extra environment for the child, applied after `force_utf8`.
    pub env: BTreeMap<String, String>,

    /// Bytes written to the child's stdin, which is closed afterwards.
    /// `None` gives the child a null stdin.
    pub input: Option<Vec<u8>>,

    pub poll_interval: Duration,
}

impl ProcessConfig {
    pub fn new(command: CommandLine) -> Self {
        Self {
            command,
            working_directory: PathBuf::from("."),
            timeout: None,
            default_error_code: DEFAULT_ERROR_CODE,
            force_utf8: true,
            env: BTreeMap::new(),
            input: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn shell(line: impl Into<String>) -> Self {
        Self::new(CommandLine::shell(line))
    }

    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(CommandLine::argv(args))
    }

    pub fn with_working_directory<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_directory = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_default_error_code(mut self, code: i32) -> Self {
        self.default_error_code = code;
        self
    }

    pub fn with_force_utf8(mut self, force: bool) -> Self {
        self.force_utf8 = force;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Environment handed to the child on top of the inherited one.
    pub fn effective_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if self.force_utf8 {
            env.insert("PYTHONIOENCODING".to_string(), "utf8".to_string());
        }
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// Job file as read from TOML, before validation.
///
/// ```toml
/// command = ["python", "build.py"]
/// working_directory = "."
/// timeout = "30s"
/// default_error_code = -1
/// poll_interval = "100ms"
///
/// [env]
/// RUST_LOG = "debug"
/// ```
///
/// Durations are strings (`"250ms"`, `"5s"`, `"1m"`, `"2h"`) and are parsed
/// during validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJobFile {
    pub command: CommandLine,

    /// Relative paths are resolved against the job file's directory by the
    /// loader.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default = "default_error_code")]
    pub default_error_code: i32,

    #[serde(default = "default_force_utf8")]
    pub force_utf8: bool,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub input: Option<String>,

    #[serde(default)]
    pub poll_interval: Option<String>,
}

fn default_error_code() -> i32 {
    DEFAULT_ERROR_CODE
}

fn default_force_utf8() -> bool {
    true
}
