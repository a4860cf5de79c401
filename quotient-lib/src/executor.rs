//! The retry and quota-wait loop around a single logical request.
//!
//! Every call walks an explicit state machine:
//!
//! ```text
//! Pace -> Send -> Classify -+-> Retry -----> Pace
//!                           +-> HardWait --> Pace
//!                           +-> return response / error
//! ```
//!
//! Transient failures consume one of `max_attempts`. Quota refusals
//! (an exhausted window or an explicit `Retry-After`) do not: they only
//! spend from the `max_quota_wait` budget.

use http::StatusCode;
use log::warn;
use std::time::{Duration, SystemTime};

use crate::ratelimit::{DEFAULT_RESET_WINDOW, Identity, IdentityStats, QuotaSnapshot};
use crate::retry::RetryExt;
use crate::transport::Transport;
use crate::{ErrorKind, Request, Response, Result};

/// How a response is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// `403` with no requests left in the window: wait for the reset
    HardExhaustion(Duration),
    /// `403`/`429` with a positive `Retry-After`: wait as asked
    SecondaryLimit(Duration),
    /// Worth another attempt after a backoff
    Transient,
    /// Hand the response to the caller
    Terminal,
}

/// The two kinds of quota refusal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    Exhausted,
    Secondary,
}

#[derive(Debug)]
enum State {
    Pace,
    Send,
    Classify(Response),
    Retry(Duration),
    HardWait {
        wait: Duration,
        status: StatusCode,
        refusal: Refusal,
    },
}

/// Decide what to do with a response, given its quota headers.
///
/// `now` is the wall-clock time used to interpret the reset timestamp and
/// `buffer` is added on top of the time until reset.
pub(crate) fn classify(
    status: StatusCode,
    snapshot: &QuotaSnapshot,
    now: SystemTime,
    buffer: Duration,
) -> Outcome {
    if status == StatusCode::FORBIDDEN && snapshot.is_exhausted() {
        return Outcome::HardExhaustion(hard_stop_wait(snapshot, now, buffer));
    }
    if matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    ) && let Some(&retry_after) = snapshot.retry_after.get()
        && !retry_after.is_zero()
    {
        return Outcome::SecondaryLimit(retry_after);
    }
    if status.should_retry() {
        Outcome::Transient
    } else {
        Outcome::Terminal
    }
}

/// `max(0, reset_at - now + buffer)`, assuming a full default window when
/// the reset time is unknown
fn hard_stop_wait(snapshot: &QuotaSnapshot, now: SystemTime, buffer: Duration) -> Duration {
    match snapshot.reset_at.get() {
        Some(reset_at) => match reset_at.duration_since(now) {
            Ok(until_reset) => until_reset.saturating_add(buffer),
            Err(past) => buffer.saturating_sub(past.duration()),
        },
        None => DEFAULT_RESET_WINDOW.saturating_add(buffer),
    }
}

/// Runs one logical request to completion on behalf of an [`Identity`].
#[derive(Debug)]
pub(crate) struct Executor<'a> {
    identity: &'a Identity,
    transport: &'a dyn Transport,
}

impl<'a> Executor<'a> {
    pub(crate) const fn new(identity: &'a Identity, transport: &'a dyn Transport) -> Self {
        Self {
            identity,
            transport,
        }
    }

    /// Send `request` until it yields a terminal response, the attempts
    /// run out or the quota wait budget is spent.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the transport fails in a way that is not worth retrying
    /// - the transport keeps failing for all `max_attempts` attempts
    /// - waiting for quota would exceed `max_quota_wait`
    pub(crate) async fn execute(&self, request: &Request) -> Result<Response> {
        let config = self.identity.config();
        let clock = self.identity.clock();
        let max_attempts = config.max_attempts;

        let mut attempt: u32 = 1;
        let mut waited = Duration::ZERO;
        let mut state = State::Pace;

        loop {
            state = match state {
                State::Pace => {
                    self.identity.pace().await;
                    State::Send
                }
                State::Send => {
                    let started = clock.now();
                    match self.transport.send(request).await {
                        Ok(response) => {
                            let elapsed = clock.now().saturating_duration_since(started);
                            let status = response.status().as_u16();
                            self.identity
                                .record(|stats| stats.record_response(status, elapsed));
                            State::Classify(response)
                        }
                        Err(e) => {
                            self.identity.record(IdentityStats::record_transport_error);
                            if !e.should_retry() || attempt >= max_attempts {
                                return Err(e);
                            }
                            let wait = config.backoff(attempt);
                            warn!(
                                "Request error on {request} (attempt {attempt}/{max_attempts}): {e}; sleeping {:.1}s",
                                wait.as_secs_f64()
                            );
                            State::Retry(wait)
                        }
                    }
                }
                State::Classify(response) => {
                    let now = clock.wall();
                    let snapshot = QuotaSnapshot::parse(response.headers(), now);
                    let status = response.status();
                    match classify(status, &snapshot, now, config.hard_stop_buffer) {
                        Outcome::HardExhaustion(wait) => State::HardWait {
                            wait,
                            status,
                            refusal: Refusal::Exhausted,
                        },
                        Outcome::SecondaryLimit(wait) => State::HardWait {
                            wait,
                            status,
                            refusal: Refusal::Secondary,
                        },
                        Outcome::Transient if attempt < max_attempts => {
                            let wait = config.backoff(attempt);
                            warn!(
                                "Transient HTTP {} on {request} (attempt {attempt}/{max_attempts}). Sleeping {:.1}s",
                                status.as_u16(),
                                wait.as_secs_f64()
                            );
                            State::Retry(wait)
                        }
                        Outcome::Transient => return Ok(response),
                        Outcome::Terminal => {
                            self.identity.observe(&snapshot);
                            return Ok(response);
                        }
                    }
                }
                State::Retry(wait) => {
                    self.identity.record(IdentityStats::record_retry);
                    clock.sleep(wait).await;
                    attempt += 1;
                    State::Pace
                }
                State::HardWait {
                    wait,
                    status,
                    refusal,
                } => {
                    // A call that gives up must leave the shared pacing state alone
                    let total = waited.saturating_add(wait);
                    if config.max_quota_wait.is_some_and(|budget| total > budget) {
                        return Err(ErrorKind::QuotaWaitExceeded { waited, status });
                    }
                    waited = total;
                    match refusal {
                        Refusal::Exhausted => warn!(
                            "Quota exhausted for {}. Sleeping for {:.1}s until reset",
                            self.identity.key,
                            wait.as_secs_f64()
                        ),
                        Refusal::Secondary => warn!(
                            "Secondary rate limit signaled. Sleeping {:.1}s (Retry-After)",
                            wait.as_secs_f64()
                        ),
                    }
                    self.identity.hold_off(wait);
                    self.identity.record(|stats| match refusal {
                        Refusal::Exhausted => stats.record_hard_stop(wait),
                        Refusal::Secondary => stats.record_secondary_limit(wait),
                    });
                    clock.sleep(wait).await;
                    State::Pace
                }
            };
        }
    }
}
