// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The first six variants are the execution taxonomy surfaced by the
//! controller and the runners; the remaining ones cover job-file loading and
//! glue code.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcrunError {
    #[error("working directory isn't valid: {0:?}")]
    InvalidWorkingDirectory(PathBuf),

    #[error("spawning process failed: {0}")]
    SpawnFailed(#[source] io::Error),

    #[error("an execution is already running on this controller")]
    AlreadyRunning,

    #[error("process timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("execution cancelled")]
    Cancelled,

    #[error("querying process state failed: {0}")]
    OsQueryFailed(#[source] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ProcrunError>;
