//! Clock and randomness sources.
//!
//! Window resets, cache expiry and backoff jitter read time and randomness
//! only through these traits so tests can drive them deterministically.
//! [`SystemClock`] and [`ThreadRandom`] are the production implementations;
//! [`MockClock`] and [`FixedRandom`] are controllable stand-ins.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + Debug {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Current Unix time in whole seconds.
    fn now_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

/// System clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
///
/// Clones share the same instant, so advancing one advances all of them.
///
/// ```
/// use affiliate_reporting::clock::{Clock, MockClock};
/// use std::time::Duration;
///
/// let clock = MockClock::at_seconds(1_700_000_000);
/// clock.advance(Duration::from_secs(2));
/// assert_eq!(clock.now_seconds(), 1_700_000_002);
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock frozen at the given Unix second.
    pub fn at_seconds(seconds: i64) -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_default())
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += step;
    }

    /// Jump to a specific instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = instant;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Source of jitter randomness.
pub trait RandomSource: Send + Sync + Debug {
    /// Uniform sample in `[-1.0, 1.0]`.
    fn symmetric_unit(&self) -> f64;
}

/// Thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn symmetric_unit(&self) -> f64 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}

/// Always returns the same sample, clamped to `[-1.0, 1.0]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn symmetric_unit(&self) -> f64 {
        self.0.clamp(-1.0, 1.0)
    }
}
