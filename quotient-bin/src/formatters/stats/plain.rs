use std::fmt::Write;

use anyhow::Result;

use super::{OutputStats, StatsFormatter};

/// One summary line followed by one line per identity, busiest first
pub(crate) struct Plain;

impl Plain {
    pub(crate) const fn new() -> Self {
        Self {}
    }
}

impl StatsFormatter for Plain {
    fn streams_responses(&self) -> bool {
        true
    }

    fn format(&self, stats: &OutputStats) -> Result<String> {
        let summary = stats.summary;
        let mut output = format!(
            "Summary: {} total, {} successful, {} failed",
            summary.total, summary.successful, summary.failed
        );
        for (identity, identity_stats) in stats.identities.sorted() {
            write!(output, "\n{identity}: {}", identity_stats.summary())?;
        }
        Ok(output)
    }
}
