use std::sync::atomic::{AtomicUsize, Ordering};

use procrun::config::ProcessConfig;
use procrun::errors::Result;
use procrun::exec::{OsSpawner, ProcessHandle, Spawner};

/// Real spawner that counts how often it was asked to spawn.
#[derive(Debug, Default)]
pub struct CountingSpawner {
    inner: OsSpawner,
    attempts: AtomicUsize,
}

impl CountingSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Spawner for CountingSpawner {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessHandle> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.spawn(config)
    }
}
