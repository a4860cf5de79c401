use log::{debug, trace};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::key::IdentityKey;
use super::stats::IdentityStats;
use crate::Result;
use crate::ratelimit::{Clock, IntervalController, QuotaSnapshot, RateLimitConfig};

/// How request starts of one identity are spaced out
#[derive(Debug)]
pub enum Pacer {
    /// Adapt the spacing to the quota reported by the server
    Adaptive(IntervalController),
    /// Sleep a fixed delay before every request and ignore quota feedback
    Fixed(Duration),
}

impl Pacer {
    /// Pick the pacer matching `config.adaptive_enabled`
    #[must_use]
    pub(crate) fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        if config.adaptive_enabled {
            Self::Adaptive(IntervalController::new(config, clock))
        } else {
            Self::Fixed(config.min_delay_between_requests)
        }
    }

    /// How long the caller has to wait before it may send
    fn reserve(&self) -> Duration {
        match self {
            Self::Adaptive(controller) => controller.reserve_slot(),
            Self::Fixed(delay) => *delay,
        }
    }
}

/// The credential scope under which quota is tracked.
///
/// Each identity owns:
/// - A [`Pacer`] that spaces request starts of all callers
/// - The [`RateLimitConfig`] and [`Clock`] it was created with
/// - Statistics about everything sent on its behalf
///
/// Identities are shared through [`Arc`]; every [`crate::Client`] built for
/// the same credential holds the same instance.
#[derive(Debug)]
pub struct Identity {
    /// The fingerprint this instance manages
    pub key: IdentityKey,

    pacer: Pacer,

    config: RateLimitConfig,

    clock: Arc<dyn Clock>,

    stats: Mutex<IdentityStats>,
}

impl Identity {
    /// Create a new identity with fresh pacing state
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::InvalidConfig`] if `config` does not pass
    /// [`RateLimitConfig::validate`].
    pub fn new(key: IdentityKey, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            key,
            pacer: Pacer::new(&config, clock.clone()),
            config,
            clock,
            stats: Mutex::new(IdentityStats::default()),
        })
    }

    /// Wait for this caller's turn to send.
    /// Only the calling task is suspended.
    pub async fn pace(&self) {
        let wait = self.pacer.reserve();
        if !wait.is_zero() {
            trace!(
                "Identity {} waiting {}ms for next slot",
                self.key,
                wait.as_millis()
            );
            self.clock.sleep(wait).await;
        }
    }

    /// Feed the quota headers of a terminal response back into the pacer
    pub fn observe(&self, snapshot: &QuotaSnapshot) {
        if let Pacer::Adaptive(controller) = &self.pacer {
            controller.update_from_quota(snapshot);
        }
    }

    /// Slow down every caller of this identity after a quota refusal
    pub fn hold_off(&self, wait: Duration) {
        match &self.pacer {
            Pacer::Adaptive(controller) => controller.bump_after_hard_stop(wait),
            Pacer::Fixed(_) => debug!(
                "Identity {} uses fixed pacing, not adjusting after quota refusal",
                self.key
            ),
        }
    }

    /// The pacer of this identity
    #[must_use]
    pub const fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// The interval controller, if pacing is adaptive
    #[must_use]
    pub const fn controller(&self) -> Option<&IntervalController> {
        match &self.pacer {
            Pacer::Adaptive(controller) => Some(controller),
            Pacer::Fixed(_) => None,
        }
    }

    /// The configuration this identity was created with
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The clock used for all pacing and waiting
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Get a copy of the identity statistics
    #[must_use]
    pub fn stats(&self) -> IdentityStats {
        self.lock_stats().clone()
    }

    pub(crate) fn record(&self, f: impl FnOnce(&mut IdentityStats)) {
        f(&mut self.lock_stats());
    }

    fn lock_stats(&self) -> MutexGuard<'_, IdentityStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{HeaderField, ManualClock};

    fn identity(config: RateLimitConfig, clock: &Arc<ManualClock>) -> Identity {
        Identity::new(IdentityKey::anonymous(), config, clock.clone()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig {
            min_interval: Duration::from_secs(10),
            ..RateLimitConfig::default()
        };

        let result = Identity::new(IdentityKey::anonymous(), config, clock);
        assert!(matches!(result, Err(crate::ErrorKind::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_adaptive_identity_paces_callers() {
        let clock = Arc::new(ManualClock::new());
        let identity = identity(RateLimitConfig::default(), &clock);
        assert!(identity.controller().is_some());

        identity.pace().await;
        identity.pace().await;
        identity.pace().await;

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(350), Duration::from_millis(350)]
        );
    }

    #[tokio::test]
    async fn test_fixed_identity_sleeps_every_time() {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig {
            adaptive_enabled: false,
            min_delay_between_requests: Duration::from_millis(200),
            ..RateLimitConfig::default()
        };
        let identity = identity(config, &clock);
        assert!(identity.controller().is_none());

        identity.pace().await;
        identity.pace().await;

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(200), Duration::from_millis(200)]
        );
    }

    #[test]
    fn test_fixed_identity_ignores_feedback() {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig {
            adaptive_enabled: false,
            ..RateLimitConfig::default()
        };
        let identity = identity(config, &clock);

        identity.observe(&QuotaSnapshot {
            limit: HeaderField::Present(10),
            remaining: HeaderField::Present(0),
            ..QuotaSnapshot::default()
        });
        identity.hold_off(Duration::from_secs(60));

        assert!(matches!(identity.pacer(), Pacer::Fixed(d) if *d == Duration::from_millis(350)));
    }

    #[test]
    fn test_hold_off_delays_next_slot() {
        let clock = Arc::new(ManualClock::new());
        let identity = identity(RateLimitConfig::default(), &clock);

        identity.hold_off(Duration::from_secs(10));
        let controller = identity.controller().unwrap();
        assert_eq!(controller.time_until_eligible(), Duration::from_secs(10));
        assert_eq!(controller.interval(), Duration::from_millis(700));
    }

    #[test]
    fn test_record_stats() {
        let clock = Arc::new(ManualClock::new());
        let identity = identity(RateLimitConfig::default(), &clock);

        identity.record(|stats| stats.record_response(200, Duration::from_millis(5)));
        identity.record(IdentityStats::record_retry);

        let stats = identity.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.retries, 1);
    }
}
