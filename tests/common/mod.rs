#![allow(dead_code)]

pub use procrun_test_utils::commands;
pub use procrun_test_utils::init_tracing;
pub use procrun_test_utils::os;

use std::time::Duration;

/// Shorthand for millisecond durations in assertions.
pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
