// src/config/mod.rs

//! Configuration for one process execution.
//!
//! Responsibilities:
//! - Define [`ProcessConfig`] and the TOML-backed job file model (`model.rs`).
//! - Load a job file from disk (`loader.rs`).
//! - Validate basic invariants like durations and command shape (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{CommandLine, ProcessConfig, RawJobFile, DEFAULT_ERROR_CODE, DEFAULT_POLL_INTERVAL};
pub use validate::validate_config;
