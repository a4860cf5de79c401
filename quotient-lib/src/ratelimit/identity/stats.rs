use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use serde::ser::SerializeStruct;

/// A [`HashMap`] mapping identities to their [`IdentityStats`]
#[derive(Debug, Default, Serialize)]
pub struct IdentityStatsMap(HashMap<String, IdentityStats>);

impl IdentityStatsMap {
    /// Sort identity statistics by request count (descending order)
    #[must_use]
    pub fn sorted(&self) -> Vec<(String, IdentityStats)> {
        let mut sorted: Vec<_> = self.0.clone().into_iter().collect();
        sorted.sort_by(|(a_key, a), (b_key, b)| {
            b.total_requests
                .cmp(&a.total_requests)
                .then_with(|| a_key.cmp(b_key))
        });
        sorted
    }

    /// Number of identities with recorded statistics
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no identity has been used yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, IdentityStats>> for IdentityStatsMap {
    fn from(value: HashMap<String, IdentityStats>) -> Self {
        Self(value)
    }
}

/// How many recent request times are kept for the median
pub const REQUEST_TIME_WINDOW: usize = 1024;

/// Record and report statistics for a [`crate::ratelimit::Identity`]
///
/// Every send is counted, including the ones that were retried, so
/// `total_requests` reflects what the server saw rather than how many
/// calls were made.
#[derive(Debug, Clone, Default)]
pub struct IdentityStats {
    /// Total number of requests that reached the transport
    pub total_requests: u64,
    /// Number of successful requests (2xx status)
    pub successful_requests: u64,
    /// Number of client error responses (4xx)
    pub client_errors: u64,
    /// Number of server error responses (5xx)
    pub server_errors: u64,
    /// Number of sends that failed before a response arrived
    pub transport_errors: u64,
    /// Number of retries caused by transient failures
    pub retries: u64,
    /// Number of times the quota was found exhausted
    pub hard_stops: u64,
    /// Number of times the server asked us to back off via `Retry-After`
    pub secondary_limits: u64,
    /// Total time spent waiting for quota to come back
    pub quota_wait: Duration,
    /// The most recent request times, for the median
    pub request_times: VecDeque<Duration>,
    /// Sum of all request times, for the average
    pub total_request_time: Duration,
    /// Number of responses whose time went into `total_request_time`
    pub timed_requests: u64,
    /// Status code counts
    pub status_codes: HashMap<u16, u64>,
}

impl IdentityStats {
    /// Record a response with status code and request duration
    pub fn record_response(&mut self, status_code: u16, request_time: Duration) {
        self.total_requests += 1;
        *self.status_codes.entry(status_code).or_insert(0) += 1;

        match status_code {
            200..=299 => self.successful_requests += 1,
            400..=499 => self.client_errors += 1,
            500..=599 => self.server_errors += 1,
            _ => {}
        }

        if self.request_times.len() == REQUEST_TIME_WINDOW {
            self.request_times.pop_front();
        }
        self.request_times.push_back(request_time);
        self.total_request_time = self.total_request_time.saturating_add(request_time);
        self.timed_requests += 1;
    }

    /// Record a send that failed without a response
    pub const fn record_transport_error(&mut self) {
        self.total_requests += 1;
        self.transport_errors += 1;
    }

    /// Record a retry after a transient failure
    pub const fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Record a wait for an exhausted quota
    pub fn record_hard_stop(&mut self, wait: Duration) {
        self.hard_stops += 1;
        self.quota_wait = self.quota_wait.saturating_add(wait);
    }

    /// Record a wait requested through `Retry-After`
    pub fn record_secondary_limit(&mut self, wait: Duration) {
        self.secondary_limits += 1;
        self.quota_wait = self.quota_wait.saturating_add(wait);
    }

    /// Get median request time over the last [`REQUEST_TIME_WINDOW`] responses
    #[must_use]
    pub fn median_request_time(&self) -> Option<Duration> {
        if self.request_times.is_empty() {
            return None;
        }

        let mut times: Vec<_> = self.request_times.iter().copied().collect();
        times.sort();
        let mid = times.len() / 2;

        if times.len().is_multiple_of(2) {
            Some((times[mid - 1] + times[mid]) / 2)
        } else {
            Some(times[mid])
        }
    }

    /// Get average request time over all responses
    #[must_use]
    pub fn average_request_time(&self) -> Option<Duration> {
        if self.timed_requests == 0 {
            return None;
        }

        let nanos = self.total_request_time.as_nanos() / u128::from(self.timed_requests);
        Some(u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos))
    }

    /// Get the current success rate (0.0 to 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let success_rate = self.successful_requests as f64 / self.total_requests as f64;
            success_rate
        }
    }

    /// Get human-readable summary of the stats
    #[must_use]
    pub fn summary(&self) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let success_pct = (self.success_rate() * 100.0) as u64;

        let avg_time = self
            .average_request_time()
            .map_or_else(|| "N/A".to_string(), |d| format!("{}ms", d.as_millis()));

        format!(
            "{} requests ({}% success, {} retries, {} hard stops, {} secondary limits), waited {:.1}s for quota, avg: {}",
            self.total_requests,
            success_pct,
            self.retries,
            self.hard_stops,
            self.secondary_limits,
            self.quota_wait.as_secs_f64(),
            avg_time
        )
    }
}

impl Serialize for IdentityStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let median_request_time_ms = self.median_request_time().map(|d| d.as_millis());

        let mut s = serializer.serialize_struct("IdentityStats", 12)?;
        s.serialize_field("total_requests", &self.total_requests)?;
        s.serialize_field("successful_requests", &self.successful_requests)?;
        s.serialize_field("success_rate", &self.success_rate())?;
        s.serialize_field("client_errors", &self.client_errors)?;
        s.serialize_field("server_errors", &self.server_errors)?;
        s.serialize_field("transport_errors", &self.transport_errors)?;
        s.serialize_field("retries", &self.retries)?;
        s.serialize_field("hard_stops", &self.hard_stops)?;
        s.serialize_field("secondary_limits", &self.secondary_limits)?;
        s.serialize_field("quota_wait_ms", &self.quota_wait.as_millis())?;
        s.serialize_field("median_request_time_ms", &median_request_time_ms)?;
        s.serialize_field("status_codes", &self.status_codes)?;
        s.end()
    }
}
