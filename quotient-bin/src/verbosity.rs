//! `-v`/`-q` flags controlling how much of the request log is shown.
//!
//! By default warnings are shown, which includes every quota wait and
//! retry.
//! - `-q` only shows errors
//! - `-qq` silences output
//! - `-v` shows info
//! - `-vv` shows debug, including every pacing adjustment
//! - `-vvv` shows trace

use std::fmt;

use log::{Level, LevelFilter};
use serde::Deserialize;

const DEFAULT_LEVEL: Level = Level::Warn;

#[derive(clap::Args, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Verbosity {
    /// Pass many times for more log output
    ///
    /// By default, warnings such as quota waits and retries are shown.
    /// Passing `-v` one time also prints info logging, `-vv` enables debug
    /// (every pacing adjustment), and `-vvv` trace.
    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "quiet",
    )]
    verbose: u8,

    /// Less output per occurrence
    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

impl Verbosity {
    /// Get the log level filter.
    ///
    /// `LevelFilter::Off` means all output is disabled.
    pub(crate) fn log_level_filter(self) -> LevelFilter {
        level_filter(self.verbosity())
    }

    #[allow(clippy::cast_possible_wrap)]
    const fn verbosity(self) -> i8 {
        level_value(DEFAULT_LEVEL) - (self.quiet as i8) + (self.verbose as i8)
    }
}

// Deserialized from a level name like "warn", "warning" or "Debug"
impl<'de> Deserialize<'de> for Verbosity {
    #[allow(clippy::cast_sign_loss)]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let level = match s.to_lowercase().as_str() {
            "off" => return Ok(Verbosity { verbose: 0, quiet: 2 }),
            "error" => Level::Error,
            "warn" | "warning" => Level::Warn,
            "info" => Level::Info,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            level => {
                return Err(serde::de::Error::custom(format!(
                    "invalid log level `{level}`"
                )));
            }
        };
        let offset = level_value(level) - level_value(DEFAULT_LEVEL);
        Ok(Verbosity {
            verbose: offset.max(0) as u8,
            quiet: (-offset).max(0) as u8,
        })
    }
}

const fn level_value(level: Level) -> i8 {
    match level {
        Level::Error => 1,
        Level::Warn => 2,
        Level::Info => 3,
        Level::Debug => 4,
        Level::Trace => 5,
    }
}

const fn level_filter(verbosity: i8) -> LevelFilter {
    match verbosity {
        i8::MIN..=0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.log_level_filter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cli {
        #[clap(flatten)]
        verbose: Verbosity,
    }

    #[test]
    fn verify_app() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_log_level() {
        assert_eq!(Verbosity::default().log_level_filter(), LevelFilter::Warn);
    }

    #[test]
    fn test_flags() {
        let level = |args: &[&str]| {
            Cli::try_parse_from(std::iter::once("quotient").chain(args.iter().copied()))
                .unwrap()
                .verbose
                .log_level_filter()
        };
        assert_eq!(level(&["-v"]), LevelFilter::Info);
        assert_eq!(level(&["-vv"]), LevelFilter::Debug);
        assert_eq!(level(&["-vvvvv"]), LevelFilter::Trace);
        assert_eq!(level(&["-q"]), LevelFilter::Error);
        assert_eq!(level(&["-qqq"]), LevelFilter::Off);
        assert!(Cli::try_parse_from(["quotient", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            verbose: Verbosity,
        }
        let parse = |level: &str| {
            toml::from_str::<Wrapper>(&format!("verbose = \"{level}\""))
                .map(|w| w.verbose.log_level_filter())
        };
        assert_eq!(parse("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse("Warning").unwrap(), LevelFilter::Warn);
        assert_eq!(parse("error").unwrap(), LevelFilter::Error);
        assert_eq!(parse("off").unwrap(), LevelFilter::Off);
        assert!(parse("loud").is_err());
    }
}
