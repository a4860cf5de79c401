//! `quotient` sends batches of HTTP requests to a quota-limited API.
//!
//! Targets come from the command line or a file (`--files-from`). Every
//! request goes through one shared client per token, which keeps the
//! aggregate request rate under the quota the server reports, waits out
//! exhausted quota and secondary rate limits, and retries transient
//! failures.
//!
//! Run it inside a repository with a `quotient.toml` or pass `--config`
//! to load settings from a file. Values given on the command line take
//! precedence over the file.
//!
//! ```console
//! $ quotient --token "$TOKEN" https://api.example.com/repos/1 https://api.example.com/repos/2
//! [200] GET https://api.example.com/repos/1
//! [200] GET https://api.example.com/repos/2
//! Summary: 2 total, 2 successful, 0 failed
//! sha256:9f86d081884c7d659a2feaa0: 2 requests (100% success, 0 retries, 0 hard stops, 0 secondary limits), waited 0.0s for quota, avg: 120ms
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Error, Result, bail};
use clap::{Parser, crate_version};
use http::HeaderMap;
use log::error;
use quotient_lib::{ClientBuilder, ClientPool};

mod commands;
mod files_from;
mod formatters;
mod options;
mod verbosity;

use crate::commands::CommandParams;
use crate::formatters::log::init_logging;
use crate::formatters::stats::OutputStats;
use crate::options::{Config, HeaderMapExt, QUOTIENT_CONFIG_FILE, QuotientOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    RequestFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't run destructors, so the actual work
    // happens in `run_main`.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<QuotientOptions> {
    let mut opts = QuotientOptions::parse();

    init_logging(opts.config.verbose);

    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // An invalid default config file is an error just like an explicit
        // one, but a missing one is not.
        let default_config = PathBuf::from(QUOTIENT_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    opts.config.method()?;
    opts.config
        .rate_limit()
        .validate()
        .context("Invalid rate limit settings")?;

    Ok(opts)
}

fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e:#}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(io::ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
/// This is helpful for troubleshooting the root cause of an error.
/// Code is taken from the anyhow documentation.
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Send all requests and print the report
async fn run(opts: &QuotientOptions) -> Result<i32> {
    let targets = opts.targets()?;
    let config = &opts.config;

    let pool = ClientPool::new();
    let builder = ClientBuilder::builder()
        .token(config.token.clone())
        .user_agent(config.user_agent.clone())
        .accept(config.accept.clone())
        .custom_headers(HeaderMap::from_header_pairs(&config.header)?)
        .timeout(Some(Duration::from_secs(config.timeout)))
        .rate_limit(config.rate_limit())
        .build();
    let client = pool
        .client(builder)
        .with_context(|| format!("Cannot create client (quotient {})", crate_version!()))?;

    let formatter = formatters::get_stats_formatter(config.format);
    let responses = commands::send(CommandParams {
        client,
        method: config.method()?,
        targets,
        max_concurrency: config.max_concurrency,
        stream_responses: formatter.streams_responses(),
    })
    .await?;

    let stats = OutputStats::new(responses, pool.all_stats());
    writeln!(io::stdout(), "{}", formatter.format(&stats)?)?;

    let exit_code = if stats.summary.is_success() {
        ExitCode::Success
    } else {
        ExitCode::RequestFailure
    };
    Ok(exit_code as i32)
}
