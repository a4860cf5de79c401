pub(crate) mod log;
pub(crate) mod response;
pub(crate) mod stats;

use self::stats::StatsFormatter;
use crate::options::StatsFormat;

pub(crate) fn get_stats_formatter(format: StatsFormat) -> Box<dyn StatsFormatter> {
    match format {
        StatsFormat::Plain => Box::new(stats::Plain::new()),
        StatsFormat::Json => Box::new(stats::Json::new()),
    }
}
