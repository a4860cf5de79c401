use crate::files_from::FilesFrom;
use crate::verbosity::Verbosity;
use anyhow::{Context, Error, Result, anyhow};
use clap::builder::PossibleValuesParser;
use clap::{Parser, builder::TypedValueParser};
use const_format::{concatcp, formatcp};
use http::{
    HeaderMap, Method,
    header::{HeaderName, HeaderValue},
};
use quotient_lib::{
    DEFAULT_ACCEPT, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, RateLimitConfig,
    ratelimit::{
        DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS, DEFAULT_SMOOTHING, DEFAULT_TARGET_UTILIZATION,
    },
};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use std::{fs, path::PathBuf, str::FromStr, time::Duration};
use strum::{Display, EnumString, VariantNames};
use url::Url;

pub(crate) const QUOTIENT_CONFIG_FILE: &str = "quotient.toml";

const DEFAULT_METHOD: &str = "get";
const DEFAULT_MAX_CONCURRENCY: usize = 16;

// clap wants `&str` defaults while serde wants typed values, so the
// duration defaults are spelled out twice. A test keeps them in sync with
// the library.
const MIN_DELAY_STR: &str = "350ms";
const MIN_INTERVAL_STR: &str = "150ms";
const MAX_INTERVAL_STR: &str = "5s";
const HARD_STOP_BUFFER_STR: &str = "2s";
const MAX_QUOTA_WAIT_STR: &str = "2h";
const MAX_CONCURRENCY_STR: &str = concatcp!(DEFAULT_MAX_CONCURRENCY);
const TIMEOUT_STR: &str = concatcp!(DEFAULT_TIMEOUT_SECS);
// Shows the default config file while still letting us tell whether the
// user asked for one. A missing default file is not an error.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    QUOTIENT_CONFIG_FILE,
);

/// The format of the final report
#[derive(Debug, Deserialize, Default, Clone, Copy, Display, EnumString, VariantNames, PartialEq, Eq)]
#[non_exhaustive]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub(crate) enum StatsFormat {
    /// One line per response followed by a per-identity summary
    #[default]
    Plain,
    /// A single JSON document with all responses and identity statistics
    Json,
}

macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    method: String = DEFAULT_METHOD.to_string();
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    accept: String = DEFAULT_ACCEPT.to_string();
    timeout: u64 = DEFAULT_TIMEOUT_SECS;
    max_concurrency: usize = DEFAULT_MAX_CONCURRENCY;
    min_delay: Duration = quotient_lib::ratelimit::DEFAULT_MIN_DELAY;
    max_attempts: u32 = DEFAULT_MAX_ATTEMPTS;
    backoff_base: f64 = DEFAULT_BACKOFF_BASE;
    target_utilization: f64 = DEFAULT_TARGET_UTILIZATION;
    smoothing: f64 = DEFAULT_SMOOTHING;
    min_interval: Duration = quotient_lib::ratelimit::DEFAULT_MIN_INTERVAL;
    max_interval: Duration = quotient_lib::ratelimit::DEFAULT_MAX_INTERVAL;
    hard_stop_buffer: Duration = quotient_lib::ratelimit::DEFAULT_HARD_STOP_BUFFER;
    max_quota_wait: Duration = quotient_lib::ratelimit::DEFAULT_MAX_QUOTA_WAIT;
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected in the format `Header-Name: Header-Value`, with
/// surrounding whitespace trimmed. Everything after the first colon is
/// the value.
///
/// # Errors
///
/// This fails if the header contains no `:` or if the name or value are
/// not valid header text.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let parts: Vec<&str> = header.splitn(2, ':').collect();
    match parts.as_slice() {
        [name, value] => {
            let name = name.trim();
            let name = HeaderName::from_str(name)
                .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
            Ok((name, value))
        }
        _ => Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        )),
    }
}

/// Parses a single HTTP header into a tuple of (String, String)
#[derive(Clone, Debug)]
struct HeaderParser;

impl TypedValueParser for HeaderParser {
    type Value = (String, String);

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let invalid_utf8 = || {
            clap::Error::raw(
                clap::error::ErrorKind::InvalidValue,
                "Header value contains invalid UTF-8",
            )
        };
        let header_str = value.to_str().ok_or_else(invalid_utf8)?;

        match parse_single_header(header_str) {
            Ok((name, value)) => {
                let value = value.to_str().map_err(|_| invalid_utf8())?;
                Ok((name.to_string(), value.to_string()))
            }
            Err(e) => Err(clap::Error::raw(
                clap::error::ErrorKind::InvalidValue,
                e.to_string(),
            )),
        }
    }
}

impl clap::builder::ValueParserFactory for HeaderParser {
    type Parser = HeaderParser;
    fn value_parser() -> Self::Parser {
        HeaderParser
    }
}

/// Extension trait for converting a Vec of header pairs to a `HeaderMap`
pub(crate) trait HeaderMapExt {
    /// Convert a collection of header key-value pairs to a `HeaderMap`
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error>;
}

impl HeaderMapExt for HeaderMap {
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("Invalid header name '{name}': {e}"))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("Invalid header value for '{name}': {e}"))?;
            header_map.insert(header_name, header_value);
        }
        Ok(header_map)
    }
}

fn deserialize_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}

/// quotient sends batches of HTTP requests to a quota-limited API.
///
/// Requests share one client per token. The client paces them so that
/// throughput stays under the quota the server reports, waits out
/// exhausted quota and secondary rate limits, and retries transient
/// failures.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct QuotientOptions {
    /// Request targets: absolute `http` or `https` URLs
    #[arg(name = "targets", required_unless_present = "files_from")]
    raw_targets: Vec<String>,

    #[arg(short, long = "config", value_name = "CONFIG_FILE", help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

impl QuotientOptions {
    /// All request targets, from the command line followed by the ones
    /// read through `--files-from`.
    pub(crate) fn targets(&self) -> Result<Vec<Url>> {
        let mut raw = self.raw_targets.clone();
        if let Some(files_from) = &self.config.files_from {
            raw.extend(FilesFrom::try_from(files_from.as_path())?.targets);
        }

        raw.iter()
            .map(|target| {
                Url::parse(target).with_context(|| format!("Invalid request target `{target}`"))
            })
            .collect()
    }
}

/// The main configuration for quotient
#[derive(Parser, Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Read request targets from the given file or stdin (if path is '-')
    #[arg(
        long,
        value_name = "PATH",
        long_help = "Read request targets from the given file or stdin (if path is '-').

One URL per line. Empty lines and lines starting with '#' are ignored.

Examples:

    quotient --files-from urls.txt
    generate-urls | quotient --files-from -"
    )]
    #[serde(default)]
    pub(crate) files_from: Option<PathBuf>,

    /// HTTP method used for every request
    #[arg(short = 'X', long, default_value = DEFAULT_METHOD)]
    #[serde(default = "method")]
    pub(crate) method: String,

    /// Custom request header
    #[arg(
        short = 'H',
        long = "header",
        value_parser = HeaderParser,
        value_name = "HEADER:VALUE",
        long_help = "Set a custom header for all requests, in the format 'Name: Value'.
The flag can be given multiple times.
User-Agent, Accept and Authorization are controlled by their own options and
take precedence over headers set here."
    )]
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    pub(crate) header: Vec<(String, String)>,

    /// Bearer token. Requests with the same token share one quota budget.
    #[arg(long, env = "QUOTIENT_TOKEN", hide_env_values = true)]
    #[serde(default)]
    pub(crate) token: Option<SecretString>,

    /// User agent
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Value of the `Accept` header
    #[arg(short, long, default_value = DEFAULT_ACCEPT)]
    #[serde(default = "accept")]
    pub(crate) accept: String,

    /// Website timeout in seconds from connect to response finished
    #[arg(short, long, default_value = TIMEOUT_STR, value_name = "SECONDS")]
    #[serde(default = "timeout")]
    pub(crate) timeout: u64,

    /// Maximum number of requests in flight at once
    #[arg(long, default_value = MAX_CONCURRENCY_STR)]
    #[serde(default = "max_concurrency")]
    pub(crate) max_concurrency: usize,

    /// Fixed delay before each request when adaptive pacing is disabled.
    /// Also the starting interval of adaptive pacing.
    #[arg(long, env = "QUOTIENT_MIN_DELAY", default_value = MIN_DELAY_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "min_delay", with = "humantime_serde")]
    pub(crate) min_delay: Duration,

    /// Attempts per request for transport errors and transient statuses
    #[arg(long, env = "QUOTIENT_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    #[serde(default = "max_attempts")]
    pub(crate) max_attempts: u32,

    /// Base of the exponential retry backoff in seconds
    #[arg(long, env = "QUOTIENT_BACKOFF_BASE", default_value_t = DEFAULT_BACKOFF_BASE)]
    #[serde(default = "backoff_base")]
    pub(crate) backoff_base: f64,

    /// Disable adaptive pacing and wait `--min-delay` before every request
    #[arg(long, env = "QUOTIENT_NO_ADAPTIVE")]
    #[serde(default)]
    pub(crate) no_adaptive: bool,

    /// Share of the remaining quota to spend before the window resets
    #[arg(long, env = "QUOTIENT_TARGET_UTILIZATION", default_value_t = DEFAULT_TARGET_UTILIZATION)]
    #[serde(default = "target_utilization")]
    pub(crate) target_utilization: f64,

    /// Weight of new quota feedback when adjusting the interval
    #[arg(long, env = "QUOTIENT_SMOOTHING", default_value_t = DEFAULT_SMOOTHING)]
    #[serde(default = "smoothing")]
    pub(crate) smoothing: f64,

    /// Lower bound of the adaptive interval
    #[arg(long, env = "QUOTIENT_MIN_INTERVAL", default_value = MIN_INTERVAL_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "min_interval", with = "humantime_serde")]
    pub(crate) min_interval: Duration,

    /// Upper bound of the adaptive interval
    #[arg(long, env = "QUOTIENT_MAX_INTERVAL", default_value = MAX_INTERVAL_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "max_interval", with = "humantime_serde")]
    pub(crate) max_interval: Duration,

    /// Extra wait on top of the quota reset time after exhaustion
    #[arg(long, env = "QUOTIENT_HARD_STOP_BUFFER", default_value = HARD_STOP_BUFFER_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "hard_stop_buffer", with = "humantime_serde")]
    pub(crate) hard_stop_buffer: Duration,

    /// Give up a request once it has waited this long for quota. `0s` waits forever.
    #[arg(long, env = "QUOTIENT_MAX_QUOTA_WAIT", default_value = MAX_QUOTA_WAIT_STR, value_parser = humantime::parse_duration)]
    #[serde(default = "max_quota_wait", with = "humantime_serde")]
    pub(crate) max_quota_wait: Duration,

    /// Output format of the final report
    #[arg(
        short,
        long,
        default_value = "plain",
        value_parser = PossibleValuesParser::new(StatsFormat::VARIANTS).try_map(|s| s.parse::<StatsFormat>())
    )]
    #[serde(default)]
    pub(crate) format: StatsFormat,

    #[command(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,
}

impl Config {
    /// The HTTP method of every request
    pub(crate) fn method(&self) -> Result<Method> {
        Method::from_bytes(self.method.to_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method `{}`", self.method))
    }

    /// Pacing and retry settings for the shared client
    pub(crate) fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            min_delay_between_requests: self.min_delay,
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            adaptive_enabled: !self.no_adaptive,
            target_utilization: self.target_utilization,
            smoothing: self.smoothing,
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            hard_stop_buffer: self.hard_stop_buffer,
            max_quota_wait: (!self.max_quota_wait.is_zero()).then_some(self.max_quota_wait),
        }
    }

    /// Special handling for merging headers
    ///
    /// Overwrites existing headers in `self` with the values from `other`.
    /// Add the headers of a config file. Header names are case-insensitive
    /// and the ones given on the command line win.
    fn merge_headers(&mut self, other: &[(String, String)]) {
        let lowercase = |(name, value): &(String, String)| (name.to_lowercase(), value.clone());
        let self_map = self.header.iter().map(lowercase).collect::<HashMap<_, _>>();
        let other_map = other.iter().map(lowercase).collect::<HashMap<_, _>>();

        let merged_map: HashMap<_, _> = other_map.into_iter().chain(self_map).collect();
        self.header = merged_map.into_iter().collect();
    }

    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        self.merge_headers(&toml.header);

        // Outside of fold_in! because SecretString doesn't implement Eq.
        if self.token.is_none() && toml.token.is_some() {
            self.token = toml.token;
        }

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..header,
                ..token,

                // Keys with defaults to assign
                files_from: None,
                method: DEFAULT_METHOD,
                user_agent: DEFAULT_USER_AGENT,
                accept: DEFAULT_ACCEPT,
                timeout: DEFAULT_TIMEOUT_SECS,
                max_concurrency: DEFAULT_MAX_CONCURRENCY,
                min_delay: min_delay(),
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                backoff_base: DEFAULT_BACKOFF_BASE,
                no_adaptive: false,
                target_utilization: DEFAULT_TARGET_UTILIZATION,
                smoothing: DEFAULT_SMOOTHING,
                min_interval: min_interval(),
                max_interval: max_interval(),
                hard_stop_buffer: hard_stop_buffer(),
                max_quota_wait: max_quota_wait(),
                format: StatsFormat::default(),
                verbose: Verbosity::default(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn parse(args: &[&str]) -> QuotientOptions {
        QuotientOptions::try_parse_from(
            ["quotient", "https://api.example.com/"]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_app() {
        use clap::CommandFactory;
        QuotientOptions::command().debug_assert();
    }

    #[test]
    fn test_duration_defaults_match_library() {
        let defaults = RateLimitConfig::default();
        let parse = |s| humantime::parse_duration(s).unwrap();
        assert_eq!(parse(MIN_DELAY_STR), defaults.min_delay_between_requests);
        assert_eq!(parse(MIN_INTERVAL_STR), defaults.min_interval);
        assert_eq!(parse(MAX_INTERVAL_STR), defaults.max_interval);
        assert_eq!(parse(HARD_STOP_BUFFER_STR), defaults.hard_stop_buffer);
        assert_eq!(Some(parse(MAX_QUOTA_WAIT_STR)), defaults.max_quota_wait);
    }

    #[test]
    fn test_cli_defaults_give_default_rate_limit() {
        assert_eq!(parse(&[]).config.rate_limit(), RateLimitConfig::default());
    }

    #[test]
    fn test_rate_limit_flags() {
        let opts = parse(&[
            "--no-adaptive",
            "--min-delay",
            "1s",
            "--max-attempts",
            "3",
            "--max-quota-wait",
            "0s",
            "--target-utilization",
            "0.5",
        ]);
        let rate_limit = opts.config.rate_limit();
        assert!(!rate_limit.adaptive_enabled);
        assert_eq!(rate_limit.min_delay_between_requests, Duration::from_secs(1));
        assert_eq!(rate_limit.max_attempts, 3);
        assert_eq!(rate_limit.max_quota_wait, None);
        assert_eq!(rate_limit.target_utilization, 0.5);
    }

    #[test]
    fn test_parse_custom_headers() {
        assert_eq!(
            parse_single_header("accept:text/html").unwrap(),
            (
                HeaderName::from_static("accept"),
                HeaderValue::from_static("text/html")
            )
        );
    }

    #[test]
    fn test_parse_custom_header_multiple_colons() {
        assert_eq!(
            parse_single_header("key:x-test:check=this").unwrap(),
            (
                HeaderName::from_static("key"),
                HeaderValue::from_static("x-test:check=this")
            )
        );
    }

    #[test]
    fn test_does_not_echo_sensitive_data() {
        let error = parse_single_header("My-Header💣: secret")
            .expect_err("Should not allow unicode as key");
        assert!(!error.to_string().contains("secret"));

        let error = parse_single_header("secret").expect_err("Should fail when no `:` given");
        assert!(!error.to_string().contains("secret"));
    }

    #[test]
    fn test_header_flags() {
        let opts = parse(&["-H", "X-One: 1", "--header", "X-Two:2"]);
        let headers = HeaderMap::from_header_pairs(&opts.config.header).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-one"], "1");
        assert_eq!(headers["x-two"], "2");
    }

    #[test]
    fn test_method() {
        assert_eq!(parse(&[]).config.method().unwrap(), Method::GET);
        assert_eq!(parse(&["-X", "post"]).config.method().unwrap(), Method::POST);
        assert!(parse(&["-X", "no spaces"]).config.method().is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(parse(&[]).config.format, StatsFormat::Plain);
        assert_eq!(parse(&["--format", "json"]).config.format, StatsFormat::Json);
        assert!(
            QuotientOptions::try_parse_from(["quotient", "http://a.test", "--format", "xml"])
                .is_err()
        );
    }

    #[test]
    fn test_targets_required() {
        assert!(QuotientOptions::try_parse_from(["quotient"]).is_err());
        assert!(QuotientOptions::try_parse_from(["quotient", "--files-from", "-"]).is_ok());
    }

    #[test]
    fn test_invalid_target() {
        let opts = QuotientOptions::try_parse_from(["quotient", "not a url"]).unwrap();
        let error = opts.targets().unwrap_err();
        assert!(error.to_string().contains("Invalid request target `not a url`"));
    }

    #[test]
    fn test_merge_takes_file_values_for_defaults() {
        let mut config = parse(&["--max-attempts", "2"]).config;
        let toml: Config = toml::from_str(
            r#"
            max_attempts = 9
            min_interval = "1s"
            no_adaptive = true
            format = "json"
            verbose = "debug"
            "#,
        )
        .unwrap();

        config.merge(toml);

        // Explicit CLI values win
        assert_eq!(config.max_attempts, 2);
        // File values fill in the defaults
        assert_eq!(config.min_interval, Duration::from_secs(1));
        assert!(config.no_adaptive);
        assert_eq!(config.format, StatsFormat::Json);
        assert_eq!(config.verbose.log_level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_merge_headers_and_token() {
        let mut config = parse(&["-H", "X-Cli: 1", "-H", "X-Same: cli"]).config;
        config.token = None;
        let toml: Config = toml::from_str(
            r#"
            token = "from-file"
            [header]
            X-File = "2"
            X-Same = "file"
            "#,
        )
        .unwrap();

        config.merge(toml);

        assert_eq!(config.header.len(), 3);
        let headers = HeaderMap::from_header_pairs(&config.header).unwrap();
        assert_eq!(headers["x-cli"], "1");
        assert_eq!(headers["x-file"], "2");
        assert_eq!(headers["x-same"], "cli");
        assert_eq!(
            config.token.as_ref().map(|token| token.expose_secret()),
            Some("from-file")
        );
    }

    #[test]
    fn test_load_from_file_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(QUOTIENT_CONFIG_FILE);
        fs::write(&path, "colour = \"blue\"\n").unwrap();
        assert!(Config::load_from_file(&path).is_err());

        fs::write(&path, "hard_stop_buffer = \"5s\"\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.hard_stop_buffer, Duration::from_secs(5));
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }
}
