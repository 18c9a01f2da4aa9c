//! Time abstraction for the retry loops.
//!
//! Production code uses [`SystemEnv`]. Tests substitute a virtual clock so
//! deadline and backoff behavior runs instantly and deterministically.

use std::time::{Duration, Instant};

/// Clock and sleep used while waiting on a slow stream.
pub trait Environment {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real wall clock and `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
