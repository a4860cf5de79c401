//! Time sources for pacing and backoff.
//!
//! All waiting in this crate goes through a [`Clock`], so the retry and
//! pacing logic can be driven by a [`ManualClock`] in tests without any
//! real time passing.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// A source of monotonic time, wall-clock time and sleeping.
#[async_trait]
pub trait Clock: Debug + Send + Sync {
    /// Monotonic "now", used for slot reservation
    fn now(&self) -> Instant;

    /// Wall-clock "now", used to interpret `X-RateLimit-Reset`
    fn wall(&self) -> SystemTime;

    /// Suspend the calling task for `duration`
    async fn sleep(&self, duration: Duration);
}

/// The real clock, backed by [`std::time`] and [`tokio::time::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A virtual clock for tests.
///
/// Time only moves when [`ManualClock::advance`] is called or when
/// somebody sleeps on it. Every sleep returns immediately after advancing
/// the clock and is recorded, so tests can assert on the exact waits.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: SystemTime,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current wall-clock time
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Create a clock whose wall time starts at `wall_origin`
    #[must_use]
    pub fn starting_at(wall_origin: SystemTime) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Total virtual time elapsed since creation
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// All non-zero sleeps requested so far, in order
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall(&self) -> SystemTime {
        self.wall_origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.lock();
            state.elapsed += duration;
            if !duration.is_zero() {
                state.sleeps.push(duration);
            }
        }
        // Give other tasks a chance to run, like a real sleep would
        tokio::task::yield_now().await;
    }
}
