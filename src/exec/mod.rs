// src/exec/mod.rs

//! Process execution layer.
//!
//! Leaves first:
//! - [`pipe`] creates the OS pipes that carry a child's standard streams.
//! - [`handle`] spawns children (behind the [`Spawner`] trait) and owns their
//!   resources in a [`ProcessHandle`].
//! - [`pump`] drains child output without blocking; [`utf8`] turns the bytes
//!   into text without splitting characters.
//! - [`controller`] owns the state machine, timeout and cancellation.
//! - [`blocking`] and [`background`] are the synchronous and asynchronous
//!   facades over the controller.

pub mod background;
pub mod blocking;
pub mod controller;
pub mod handle;
pub mod pipe;
pub mod pump;
pub mod utf8;

pub use background::{BackgroundRunner, ExitReport};
pub use blocking::{run_blocking, ExecutionResult};
pub use controller::{ExecutionState, LifecycleController, StopHandle};
pub use handle::{exit_code_of, spawn_process, OsSpawner, ProcessHandle, Spawner};
pub use pump::{Drained, OutputPump, CHUNK_SIZE, DRAIN_LIMIT};
