// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{ProcessConfig, RawJobFile};
use crate::errors::Result;

/// Load a job file from a given path and return the raw `RawJobFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawJobFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let job: RawJobFile = toml::from_str(&contents)?;

    Ok(job)
}

/// Load a job file from path, validate it and turn it into a
/// [`ProcessConfig`].
///
/// A relative `working_directory` is resolved against the directory that
/// contains the job file; a missing one defaults to that directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ProcessConfig> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;

    let base = job_root_dir(path);
    raw.working_directory = Some(match raw.working_directory.take() {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => base.join(dir),
        None => base.to_path_buf(),
    });

    ProcessConfig::try_from(raw)
}

fn job_root_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
