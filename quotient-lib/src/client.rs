//! Quota-aware HTTP client.
//!
//! This module defines two structs, [`Client`] and [`ClientBuilder`].
//! `Client` sends requests on behalf of one identity and returns
//! responses. `ClientBuilder` exposes a finer level of granularity for
//! building a `Client`.
#![allow(clippy::module_name_repetitions)]

use http::header::{self, HeaderMap, HeaderValue};
use http::Method;
use log::debug;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use typed_builder::TypedBuilder;
use url::Url;

use crate::executor::Executor;
use crate::ratelimit::{Clock, Identity, IdentityKey, IdentityStats, RateLimitConfig, SystemClock};
use crate::transport::{ReqwestTransport, Transport};
use crate::{ErrorKind, Request, RequestOptions, Response, Result};

/// Default user agent, `quotient/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("quotient/", env!("CARGO_PKG_VERSION"));
/// Default `Accept` header value.
pub const DEFAULT_ACCEPT: &str = "application/json";
/// Default timeout in seconds before a single send is abandoned, 30.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// Constants currently not configurable by the user.
/// A timeout for only the connect phase of a Client.
const CONNECT_TIMEOUT: u64 = 10;
/// TCP keepalive
/// See <https://tldp.org/HOWTO/TCP-Keepalive-HOWTO/overview.html> for more info
const TCP_KEEPALIVE: u64 = 60;

/// Builder for [`Client`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ClientBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ClientBuilder`.
"))]
pub struct ClientBuilder {
    /// Optional bearer token.
    ///
    /// The token decides the identity a client belongs to: quota is
    /// tracked per token, and all clients built from a [`crate::ClientPool`]
    /// with the same token share their pacing.
    token: Option<SecretString>,

    /// User-agent sent with every request.
    #[builder(default = String::from(DEFAULT_USER_AGENT))]
    user_agent: String,

    /// Value of the `Accept` header sent with every request.
    #[builder(default = String::from(DEFAULT_ACCEPT))]
    accept: String,

    /// Sets the default [headers] for every request.
    ///
    /// `User-Agent`, `Accept` and `Authorization` are set from the
    /// dedicated fields and take precedence over the same headers here.
    ///
    /// [headers]: https://docs.rs/http/latest/http/header/struct.HeaderName.html
    custom_headers: HeaderMap,

    /// Response timeout per send. Individual requests can override it
    /// through [`RequestOptions::timeout`].
    #[builder(default = Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))]
    timeout: Option<Duration>,

    /// Pacing, retry and quota wait settings.
    rate_limit: RateLimitConfig,

    /// Source of time for pacing and waiting.
    #[builder(default = Arc::new(SystemClock))]
    clock: Arc<dyn Clock>,
}

impl Default for ClientBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// Instantiates a [`Client`] with a fresh identity of its own.
    ///
    /// Clones of the returned client share that identity; use a
    /// [`crate::ClientPool`] to share it between independently built
    /// clients.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The rate limit configuration is invalid.
    /// - The user-agent, accept value or token are not valid header values.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn client(self) -> Result<Client> {
        let identity = Arc::new(self.new_identity()?);
        self.client_with_identity(identity)
    }

    /// The identity key clients from this builder are tracked under
    #[must_use]
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::from_token(self.token.as_ref())
    }

    pub(crate) fn new_identity(&self) -> Result<Identity> {
        Identity::new(self.identity_key(), self.rate_limit, self.clock.clone())
    }

    pub(crate) const fn rate_limit(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    /// Build the transport and attach it to an existing identity
    pub(crate) fn client_with_identity(self, identity: Arc<Identity>) -> Result<Client> {
        let Self {
            token,
            user_agent,
            accept,
            custom_headers: mut headers,
            timeout,
            ..
        } = self;

        headers.insert(header::USER_AGENT, HeaderValue::from_str(&user_agent)?);
        headers.insert(header::ACCEPT, HeaderValue::from_str(&accept)?);

        match token.as_ref().map(|token| token.expose_secret()) {
            Some(token) if !token.is_empty() => {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
                value.set_sensitive(true);
                headers.insert(header::AUTHORIZATION, value);
            }
            _ => {
                headers.remove(header::AUTHORIZATION);
            }
        }

        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT))
            .tcp_keepalive(Duration::from_secs(TCP_KEEPALIVE));

        let reqwest_client = (match timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()
        .map_err(ErrorKind::BuildRequestClient)?;

        debug!("Built client for identity {}", identity.key);

        Ok(Client::from_parts(
            identity,
            Arc::new(ReqwestTransport::new(reqwest_client)),
        ))
    }
}

/// Handles incoming requests and returns responses.
///
/// A client is cheap to clone: clones share the connection pool and the
/// pacing state of their identity, so one client can be handed to any
/// number of concurrent tasks.
///
/// See [`ClientBuilder`] which contains sane defaults for all configuration
/// options.
#[derive(Debug, Clone)]
pub struct Client {
    identity: Arc<Identity>,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Assemble a client from an identity and any [`Transport`]
    #[must_use]
    pub fn from_parts(identity: Arc<Identity>, transport: Arc<dyn Transport>) -> Self {
        Self {
            identity,
            transport,
        }
    }

    /// Send a request, pacing it against the identity's quota and
    /// retrying transient failures.
    ///
    /// Exhausted retries on transient statuses (`429`, `5xx`) still return
    /// the last response. Callers decide what a non-success status means.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The request could not be delivered after all attempts, or failed
    ///   in a way that is not worth retrying.
    /// - Waiting for the quota would exceed `max_quota_wait`.
    pub async fn execute(
        &self,
        method: Method,
        url: Url,
        options: RequestOptions,
    ) -> Result<Response> {
        let request = Request::new(method, url, options);
        debug!("{request}");
        Executor::new(&self.identity, self.transport.as_ref())
            .execute(&request)
            .await
    }

    /// Send a `GET` request without extra options.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if `url` cannot be parsed, or for any of the
    /// reasons listed in [`Client::execute`].
    pub async fn get(&self, url: &str) -> Result<Response> {
        let url = Url::parse(url).map_err(|e| ErrorKind::InvalidUrl(url.to_string(), e))?;
        self.execute(Method::GET, url, RequestOptions::default())
            .await
    }

    /// The identity this client sends on behalf of
    #[must_use]
    pub const fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Statistics of everything sent under this client's identity
    #[must_use]
    pub fn stats(&self) -> IdentityStats {
        self.identity.stats()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use http::{HeaderMap, Method, StatusCode, header};
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use test_utils::{mock_server, quota_response};
    use url::Url;
    use wiremock::matchers::{body_json, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{ClientBuilder, DEFAULT_USER_AGENT};
    use crate::ratelimit::{Clock, ManualClock, RateLimitConfig};
    use crate::{ErrorKind, RequestOptions};

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::starting_at(SystemTime::now()))
    }

    fn unix_now(clock: &ManualClock) -> u64 {
        clock
            .wall()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[tokio::test]
    async fn test_default_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_matcher("user-agent", DEFAULT_USER_AGENT))
            .and(header_matcher("accept", "application/json"))
            .and(header_matcher("authorization", "Bearer s3cr3t"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::builder()
            .token(SecretString::from("s3cr3t"))
            .build()
            .client()
            .unwrap();
        let response = client.get(&mock_server.uri()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_matcher("x-api-version", "2022-11-28"))
            .and(header_matcher("user-agent", "auditor"))
            .and(header_matcher("accept", "application/vnd.github+json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut custom = HeaderMap::new();
        custom.insert("x-api-version", "2022-11-28".parse().unwrap());
        custom.insert(header::USER_AGENT, "overridden".parse().unwrap());
        let client = ClientBuilder::builder()
            .custom_headers(custom)
            .user_agent("auditor")
            .accept("application/vnd.github+json")
            .build()
            .client()
            .unwrap();

        let response = client.get(&mock_server.uri()).await.unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_no_authorization_without_token() {
        let mock_server = mock_server!(StatusCode::OK);

        let client = ClientBuilder::default().client().unwrap();
        client.get(&mock_server.uri()).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
        assert!(client.identity().key.is_anonymous());
    }

    #[tokio::test]
    async fn test_post_json_with_query() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_json(serde_json::json!({"query": "{ viewer { login } }"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"viewer": {"login": "octocat"}}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::default().client().unwrap();
        let options = RequestOptions::default()
            .json(&serde_json::json!({"query": "{ viewer { login } }"}))
            .unwrap();
        let url = Url::parse(&format!("{}/graphql", mock_server.uri())).unwrap();
        let response = client.execute(Method::POST, url, options).await.unwrap();

        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["data"]["viewer"]["login"], "octocat");
    }

    #[tokio::test]
    async fn test_quota_headers_adjust_interval() {
        let clock = manual_clock();
        let reset = unix_now(&clock) + 60;
        let mock_server = mock_server!(
            StatusCode::OK,
            insert_header("x-ratelimit-limit", "5000"),
            insert_header("x-ratelimit-remaining", "10"),
            insert_header("x-ratelimit-reset", reset.to_string().as_str())
        );

        let client = ClientBuilder::builder()
            .rate_limit(RateLimitConfig {
                min_delay_between_requests: Duration::from_secs(1),
                max_interval: Duration::from_secs(30),
                ..RateLimitConfig::default()
            })
            .clock(clock.clone() as Arc<dyn Clock>)
            .build()
            .client()
            .unwrap();
        client.get(&mock_server.uri()).await.unwrap();

        let interval = client.identity().controller().unwrap().interval();
        // One step from 1s toward 10s; the reset header has whole-second
        // precision, so allow for a little drift
        assert!(
            (3.6..=3.71).contains(&interval.as_secs_f64()),
            "unexpected interval {interval:?}"
        );
    }

    #[tokio::test]
    async fn test_hard_stop_is_absorbed() {
        let clock = manual_clock();
        let reset = unix_now(&clock) + 30;
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(quota_response!(403, 5000, 0, reset))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(quota_response!(200, 5000, 4999, reset + 3600))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::builder()
            .rate_limit(RateLimitConfig {
                max_attempts: 1,
                ..RateLimitConfig::default()
            })
            .clock(clock.clone() as Arc<dyn Clock>)
            .build()
            .client()
            .unwrap();
        let response = client.get(&mock_server.uri()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 1);
        // 30s until reset plus the 2s buffer, give or take the sub-second
        // part of the wall clock
        assert!(
            sleeps[0] > Duration::from_secs(30) && sleeps[0] <= Duration::from_secs(32),
            "unexpected wait {sleeps:?}"
        );
        assert_eq!(client.stats().hard_stops, 1);
    }

    #[tokio::test]
    async fn test_transient_statuses_are_retried() {
        let clock = manual_clock();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::builder()
            .clock(clock.clone() as Arc<dyn Clock>)
            .build()
            .client()
            .unwrap();
        let response = client.get(&mock_server.uri()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(client.stats().retries, 2);
        assert_eq!(client.stats().total_requests, 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let mock_delay = Duration::from_millis(500);
        let timeout = Duration::from_millis(50);
        let mock_server = mock_server!(StatusCode::OK, set_delay(mock_delay));

        let client = ClientBuilder::builder()
            .timeout(timeout)
            .rate_limit(RateLimitConfig {
                max_attempts: 1,
                ..RateLimitConfig::default()
            })
            .build()
            .client()
            .unwrap();

        let err = client.get(&mock_server.uri()).await.unwrap_err();
        assert!(err.reqwest_error().is_some_and(reqwest::Error::is_timeout));
    }

    #[tokio::test]
    async fn test_clones_share_identity() {
        let client = ClientBuilder::default().client().unwrap();
        let clone = client.clone();
        assert!(Arc::ptr_eq(client.identity(), clone.identity()));

        // Separately built clients get their own pacing state
        let other = ClientBuilder::default().client().unwrap();
        assert!(!Arc::ptr_eq(client.identity(), other.identity()));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let client = ClientBuilder::default().client().unwrap();
        let err = client.get("not a url").await.unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidUrl(..)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = ClientBuilder::builder()
            .rate_limit(RateLimitConfig {
                backoff_base: 1.0,
                ..RateLimitConfig::default()
            })
            .build()
            .client()
            .unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_user_agent() {
        let err = ClientBuilder::builder()
            .user_agent("bad\nagent")
            .build()
            .client()
            .unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidHeader(_)));
    }
}
