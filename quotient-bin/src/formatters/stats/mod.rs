mod json;
mod plain;

pub(crate) use json::Json;
pub(crate) use plain::Plain;

use anyhow::Result;
use quotient_lib::ratelimit::IdentityStatsMap;
use serde::Serialize;

use crate::formatters::response::RequestOutcome;

/// Counts over all request targets of one run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct ResponseStats {
    pub(crate) total: usize,
    pub(crate) successful: usize,
    pub(crate) failed: usize,
}

impl ResponseStats {
    pub(crate) fn add(&mut self, outcome: &RequestOutcome) {
        self.total += 1;
        if outcome.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Every target got a 2xx response
    pub(crate) const fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Everything the final report is built from
#[derive(Debug, Serialize)]
pub(crate) struct OutputStats {
    pub(crate) summary: ResponseStats,
    pub(crate) responses: Vec<RequestOutcome>,
    pub(crate) identities: IdentityStatsMap,
}

impl OutputStats {
    pub(crate) fn new(responses: Vec<RequestOutcome>, identities: IdentityStatsMap) -> Self {
        let mut summary = ResponseStats::default();
        for outcome in &responses {
            summary.add(outcome);
        }
        Self {
            summary,
            responses,
            identities,
        }
    }
}

pub(crate) trait StatsFormatter {
    /// Whether every response should also be printed as it arrives
    fn streams_responses(&self) -> bool;

    /// Format the final report
    fn format(&self, stats: &OutputStats) -> Result<String>;
}
