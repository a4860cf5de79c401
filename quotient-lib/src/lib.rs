//! `quotient` is a quota-aware HTTP request layer.
//!
//! Every request goes through the same loop: wait for a pacing slot, send,
//! read the quota headers of the response, and then either return it, back
//! off and retry, or sleep until the quota window resets. The spacing
//! between requests adapts to the remaining quota the server reports, so
//! that long-running batch jobs spend their budget evenly instead of
//! running into a wall.
//!
//! "Hello world" example:
//! ```no_run
//! use quotient_lib::{ClientBuilder, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let client = ClientBuilder::default().client()?;
//!   let response = client.get("https://api.github.com/rate_limit").await?;
//!   println!("{}", response.status());
//!   Ok(())
//! }
//! ```
//!
//! Clients are cheap to clone and meant to be shared between tasks. All
//! clones pace against one budget:
//!
//! ```no_run
//! use http::Method;
//! use quotient_lib::{ClientBuilder, RateLimitConfig, RequestOptions, Result};
//! use secrecy::SecretString;
//! use std::time::Duration;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let client = ClientBuilder::builder()
//!       .token(SecretString::from("ghp_example"))
//!       .rate_limit(RateLimitConfig {
//!           target_utilization: 0.5,
//!           max_interval: Duration::from_secs(10),
//!           ..RateLimitConfig::default()
//!       })
//!       .build()
//!       .client()?;
//!
//!   let mut tasks = Vec::new();
//!   for page in 1..=10 {
//!       let client = client.clone();
//!       tasks.push(tokio::spawn(async move {
//!           let options = RequestOptions::builder()
//!               .query(vec![("page".to_string(), page.to_string())])
//!               .build();
//!           let url = Url::parse("https://api.github.com/orgs/rust-lang/repos").unwrap();
//!           client.execute(Method::GET, url, options).await
//!       }));
//!   }
//!   for task in tasks {
//!       let response = task.await.unwrap()?;
//!       println!("{}", response.status());
//!   }
//!   println!("{}", client.stats().summary());
//!   Ok(())
//! }
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
#![allow(clippy::module_name_repetitions)]

mod client;
mod client_pool;
mod executor;
mod retry;
mod transport;
mod types;

pub mod ratelimit;

#[cfg(test)]
mod test_utils;

pub use crate::{
    client::{Client, ClientBuilder, DEFAULT_ACCEPT, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT},
    client_pool::ClientPool,
    ratelimit::{Clock, ManualClock, QuotaSnapshot, RateLimitConfig, SystemClock},
    transport::{ReqwestTransport, Transport},
    types::{ErrorKind, Request, RequestOptions, Response, Result},
};
