//! Virtual clock.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use eppwire_core::Environment;

/// Clock that only moves when slept on or advanced explicitly.
///
/// Clones share the same timeline, so a scripted stream can advance the
/// clock the connection reads.
#[derive(Debug, Clone)]
pub struct VirtualEnv {
    origin: Instant,
    state: Arc<Mutex<ClockState>>,
}

#[derive(Debug, Default)]
struct ClockState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl VirtualEnv {
    /// Clock at virtual time zero.
    pub fn new() -> Self {
        Self { origin: Instant::now(), state: Arc::new(Mutex::new(ClockState::default())) }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.offset += duration;
    }

    /// Virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).offset
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).sleeps.clone()
    }
}

impl Default for VirtualEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for VirtualEnv {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.offset += duration;
        state.sleeps.push(duration);
    }
}
