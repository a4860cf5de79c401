//! Per-identity pacing driven by quota feedback.
//!
//! Requests sent under the same credential share one quota on the server
//! side, so they share one pacing state on ours. This module holds the
//! pieces that make up that state and the feedback that steers it.
//!
//! # Architecture
//!
//! - [`IdentityKey`]: Fingerprint of the credential that quota is tracked for
//! - [`Identity`]: Owns the [`Pacer`] and the statistics for one credential
//! - [`IntervalController`]: Adapts the spacing of request starts to the
//!   remaining quota
//! - [`QuotaSnapshot`]: Quota headers parsed out of a single response
//! - [`RateLimitConfig`]: Tuning knobs shared by all of the above
//! - [`Clock`]: Source of time and sleeping, swappable for [`ManualClock`]
//!   in tests

mod clock;
mod config;
pub mod headers;
mod identity;
pub mod interval;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_BACKOFF_BASE, DEFAULT_HARD_STOP_BUFFER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_INTERVAL,
    DEFAULT_MAX_QUOTA_WAIT, DEFAULT_MIN_DELAY, DEFAULT_MIN_INTERVAL, DEFAULT_SMOOTHING,
    DEFAULT_TARGET_UTILIZATION, RateLimitConfig,
};
pub use headers::{HeaderField, QuotaSnapshot};
pub use identity::{
    Identity, IdentityKey, IdentityStats, IdentityStatsMap, Pacer, REQUEST_TIME_WINDOW,
};
pub use interval::IntervalController;
pub(crate) use interval::DEFAULT_RESET_WINDOW;
