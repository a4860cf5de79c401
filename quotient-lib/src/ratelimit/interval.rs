//! The adaptive interval controller.
//!
//! One [`IntervalController`] paces every request of one identity. Callers
//! reserve a start slot, sleep outside of the lock until it comes up, and
//! feed quota headers back in so that the interval tracks the budget the
//! server reports.

use log::{debug, trace};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::clock::Clock;
use super::config::RateLimitConfig;
use super::headers::QuotaSnapshot;

/// Lowest request rate the controller will ever aim for, in requests per second
const MIN_ALLOWED_RATE: f64 = 0.01;

/// Reset horizon assumed when the server does not say when the window resets
pub(crate) const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(60);

/// Shortest reset horizon used for rate calculations
const MIN_RESET_WINDOW: Duration = Duration::from_secs(1);

const TARGET_UTILIZATION_BOUNDS: (f64, f64) = (0.05, 0.95);
const SMOOTHING_BOUNDS: (f64, f64) = (0.05, 0.9);

/// Longest hold the controller will place on an identity
const MAX_HOLD: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `instant + wait`, capped at [`MAX_HOLD`] so that absurd server-provided
/// waits cannot overflow `Instant`
fn instant_after(instant: Instant, wait: Duration) -> Instant {
    instant.checked_add(wait.min(MAX_HOLD)).unwrap_or(instant)
}

/// Quota feedback that passed validation
#[derive(Debug, Clone, Copy)]
struct Feedback {
    limit: u64,
    remaining: u64,
    reset_in: Duration,
    target_interval: Duration,
}

#[derive(Debug)]
struct IntervalState {
    /// Minimum spacing between two request starts
    interval: Duration,
    /// No request may start before this instant
    next_eligible: Instant,
}

/// Shared pacing state of one identity.
///
/// All mutation happens behind a single mutex that is held only long enough
/// to read and advance the state. Nothing ever sleeps while holding it.
#[derive(Debug)]
pub struct IntervalController {
    state: Mutex<IntervalState>,
    min_interval: Duration,
    max_interval: Duration,
    target_utilization: f64,
    smoothing: f64,
    clock: Arc<dyn Clock>,
}

impl IntervalController {
    /// Create a controller from the pacing fields of `config`.
    ///
    /// The starting interval is `min_delay_between_requests`, clamped into
    /// `[min_interval, max_interval]`. The config must have passed
    /// [`RateLimitConfig::validate`].
    #[must_use]
    pub(crate) fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let interval = config
            .min_delay_between_requests
            .clamp(config.min_interval, config.max_interval);
        Self {
            state: Mutex::new(IntervalState {
                interval,
                next_eligible: clock.now(),
            }),
            min_interval: config.min_interval,
            max_interval: config.max_interval,
            target_utilization: config
                .target_utilization
                .clamp(TARGET_UTILIZATION_BOUNDS.0, TARGET_UTILIZATION_BOUNDS.1),
            smoothing: config
                .smoothing
                .clamp(SMOOTHING_BOUNDS.0, SMOOTHING_BOUNDS.1),
            clock,
        }
    }

    /// Reserve the next start slot and return how long the caller has to
    /// wait for it.
    ///
    /// Concurrent callers get distinct slots, each at least one interval
    /// after the previous one.
    pub fn reserve_slot(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.lock();
        let start = now.max(state.next_eligible);
        state.next_eligible = instant_after(start, state.interval);
        start - now
    }

    /// Steer the interval toward the rate that would spend
    /// `target_utilization` of the remaining quota before the window resets.
    ///
    /// Snapshots without a positive limit and a remaining count, or with
    /// more remaining than the limit, are ignored. An exhausted snapshot
    /// additionally holds back every further request until the reset.
    pub fn update_from_quota(&self, snapshot: &QuotaSnapshot) {
        let Some(feedback) = self.feedback(snapshot) else {
            trace!("Ignoring quota feedback without usable limit/remaining: {snapshot:?}");
            return;
        };

        let now = self.clock.now();
        let mut state = self.lock();
        let old = state.interval;
        state.interval = Duration::try_from_secs_f64(
            old.as_secs_f64() * (1.0 - self.smoothing)
                + feedback.target_interval.as_secs_f64() * self.smoothing,
        )
        .unwrap_or(self.max_interval)
        .clamp(self.min_interval, self.max_interval);

        if feedback.remaining == 0 {
            state.next_eligible = state
                .next_eligible
                .max(instant_after(now, feedback.reset_in));
        }
        let interval = state.interval;
        drop(state);

        debug!(
            "Adaptive throttle: remain={} limit={} reset_in={:.0}s interval: {:.2}s -> {:.2}s (rps≈{:.2})",
            feedback.remaining,
            feedback.limit,
            feedback.reset_in.as_secs_f64(),
            old.as_secs_f64(),
            interval.as_secs_f64(),
            1.0 / interval.as_secs_f64().max(1e-6)
        );
    }

    /// Slow down after the server refused a request for quota reasons.
    ///
    /// Doubles the interval (up to `max_interval`) and keeps every caller
    /// away for at least `wait`.
    pub fn bump_after_hard_stop(&self, wait: Duration) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.interval = state
            .interval
            .saturating_mul(2)
            .min(self.max_interval)
            .max(state.interval);
        state.next_eligible = state.next_eligible.max(instant_after(now, wait));
        debug!(
            "Hard stop: interval raised to {:.2}s, pausing for {:.1}s",
            state.interval.as_secs_f64(),
            wait.as_secs_f64()
        );
    }

    /// The current interval between request starts
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.lock().interval
    }

    /// How long from now until the next slot opens up
    #[must_use]
    pub fn time_until_eligible(&self) -> Duration {
        let now = self.clock.now();
        self.lock().next_eligible.saturating_duration_since(now)
    }

    /// The target interval for a snapshot, without touching any state.
    /// Returns `None` if the snapshot carries no usable quota feedback.
    #[must_use]
    pub fn target_interval(&self, snapshot: &QuotaSnapshot) -> Option<Duration> {
        self.feedback(snapshot).map(|f| f.target_interval)
    }

    fn feedback(&self, snapshot: &QuotaSnapshot) -> Option<Feedback> {
        let (&limit, &remaining) = (snapshot.limit.get()?, snapshot.remaining.get()?);
        if limit == 0 || remaining > limit {
            return None;
        }
        let reset_in = snapshot
            .reset_in(self.clock.wall())
            .unwrap_or(DEFAULT_RESET_WINDOW)
            .max(MIN_RESET_WINDOW);

        #[allow(clippy::cast_precision_loss)]
        let allowed_rate = (remaining as f64 / reset_in.as_secs_f64() * self.target_utilization)
            .max(MIN_ALLOWED_RATE);
        let target_interval = Duration::from_secs_f64(1.0 / allowed_rate)
            .clamp(self.min_interval, self.max_interval);

        Some(Feedback {
            limit,
            remaining,
            reset_in,
            target_interval,
        })
    }

    // A panic while holding the lock cannot leave the state half-updated,
    // so a poisoned mutex is still safe to use.
    fn lock(&self) -> MutexGuard<'_, IntervalState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
