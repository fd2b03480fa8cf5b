//! Output device clocks.
//!
//! Playback is scheduled against the clock of the output device, not wall
//! time. The scheduler only ever asks for "now"; the clock is injected so tests
//! can drive time deterministically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic clock of an audio output device.
pub trait OutputClock: Send + Sync {
    /// Current position of the device clock.
    fn now(&self) -> Duration;
}

impl<C: OutputClock + ?Sized> OutputClock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Clock backed by [`Instant`], starting at zero when created.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually driven clock for tests and offline rendering.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
