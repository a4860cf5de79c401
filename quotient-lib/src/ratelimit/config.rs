use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ErrorKind, Result};

/// Default fixed delay before each request when adaptive pacing is off.
/// Also the starting interval of the adaptive controller.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(350);
/// Default number of attempts for transport and transient server failures
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
/// Default base of the exponential backoff, in seconds
pub const DEFAULT_BACKOFF_BASE: f64 = 1.7;
/// Default share of the remaining quota the controller may spend
pub const DEFAULT_TARGET_UTILIZATION: f64 = 0.6;
/// Default weight of new feedback in the interval EMA
pub const DEFAULT_SMOOTHING: f64 = 0.3;
/// Default lower bound of the adaptive interval
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(150);
/// Default upper bound of the adaptive interval
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(5);
/// Default extra wait on top of `X-RateLimit-Reset` after a hard stop
pub const DEFAULT_HARD_STOP_BUFFER: Duration = Duration::from_secs(2);
/// Default cap on the total quota wait of a single call
pub const DEFAULT_MAX_QUOTA_WAIT: Duration = Duration::from_secs(2 * 60 * 60);

/// Pacing and retry configuration for one identity.
///
/// All durations are (de)serialized in humantime format, e.g. `"350ms"`
/// or `"5s"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Fixed delay before every request when `adaptive_enabled` is false
    #[serde(default = "default_min_delay", with = "humantime_serde")]
    pub min_delay_between_requests: Duration,

    /// Attempts per call for transport errors and transient statuses
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// The n-th retry waits `backoff_base^(n-1)` seconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    /// Adapt the request interval to the reported quota
    #[serde(default = "default_adaptive_enabled")]
    pub adaptive_enabled: bool,

    /// Share of the remaining quota to spend before the window resets
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,

    /// Weight of new feedback when blending the interval
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,

    /// Lower bound of the adaptive interval
    #[serde(default = "default_min_interval", with = "humantime_serde")]
    pub min_interval: Duration,

    /// Upper bound of the adaptive interval
    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,

    /// Added to the wait until `X-RateLimit-Reset` after quota exhaustion
    #[serde(default = "default_hard_stop_buffer", with = "humantime_serde")]
    pub hard_stop_buffer: Duration,

    /// Upper bound on the quota waits of a single call (`None` waits forever)
    #[serde(default = "default_max_quota_wait", with = "humantime_serde")]
    pub max_quota_wait: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_delay_between_requests: DEFAULT_MIN_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            adaptive_enabled: true,
            target_utilization: DEFAULT_TARGET_UTILIZATION,
            smoothing: DEFAULT_SMOOTHING,
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            hard_stop_buffer: DEFAULT_HARD_STOP_BUFFER,
            max_quota_wait: Some(DEFAULT_MAX_QUOTA_WAIT),
        }
    }
}

const fn default_min_delay() -> Duration {
    DEFAULT_MIN_DELAY
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_backoff_base() -> f64 {
    DEFAULT_BACKOFF_BASE
}

const fn default_adaptive_enabled() -> bool {
    true
}

const fn default_target_utilization() -> f64 {
    DEFAULT_TARGET_UTILIZATION
}

const fn default_smoothing() -> f64 {
    DEFAULT_SMOOTHING
}

const fn default_min_interval() -> Duration {
    DEFAULT_MIN_INTERVAL
}

const fn default_max_interval() -> Duration {
    DEFAULT_MAX_INTERVAL
}

const fn default_hard_stop_buffer() -> Duration {
    DEFAULT_HARD_STOP_BUFFER
}

#[allow(clippy::unnecessary_wraps)]
const fn default_max_quota_wait() -> Option<Duration> {
    Some(DEFAULT_MAX_QUOTA_WAIT)
}

impl RateLimitConfig {
    /// Check the constraints the executor and controller rely on.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if
    /// - `max_attempts` is zero
    /// - `backoff_base` is not a finite number greater than one
    /// - `target_utilization` or `smoothing` is outside of `(0, 1)`
    /// - `min_interval` is greater than `max_interval`, or `max_interval` is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if !self.backoff_base.is_finite() || self.backoff_base <= 1.0 {
            return Err(invalid(format!(
                "backoff_base must be greater than 1, got {}",
                self.backoff_base
            )));
        }
        if !is_open_fraction(self.target_utilization) {
            return Err(invalid(format!(
                "target_utilization must be between 0 and 1, got {}",
                self.target_utilization
            )));
        }
        if !is_open_fraction(self.smoothing) {
            return Err(invalid(format!(
                "smoothing must be between 0 and 1, got {}",
                self.smoothing
            )));
        }
        if self.max_interval.is_zero() {
            return Err(invalid("max_interval must not be zero"));
        }
        if self.min_interval > self.max_interval {
            return Err(invalid(format!(
                "min_interval ({:?}) must not exceed max_interval ({:?})",
                self.min_interval, self.max_interval
            )));
        }
        Ok(())
    }

    /// Wait before the retry following failed attempt number `attempt`
    /// (1-based): `backoff_base^(attempt-1)` seconds.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        Duration::try_from_secs_f64(self.backoff_base.powi(exponent)).unwrap_or(Duration::MAX)
    }
}

fn invalid(message: impl Into<String>) -> ErrorKind {
    ErrorKind::InvalidConfig(message.into())
}

fn is_open_fraction(value: f64) -> bool {
    value > 0.0 && value < 1.0
}
