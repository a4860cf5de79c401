//! The seam between the executor and the network.
//!
//! The executor never talks to `reqwest` directly. It hands a [`Request`]
//! to a [`Transport`] and gets back a fully read [`Response`], which keeps
//! the retry and pacing logic testable with scripted transports.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{ErrorKind, Request, Response, Result};

/// Sends one request and reads the whole response.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Perform a single send.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered or the response
    /// body cannot be read. Non-success statuses are not errors.
    async fn send(&self, request: &Request) -> Result<Response>;
}

/// [`Transport`] backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an already configured reqwest client
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &Request) -> Result<reqwest::Request> {
        let options = &request.options;
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(options.headers.clone());
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = &options.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().map_err(ErrorKind::NetworkRequest)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        let reqwest_request = self.build(request)?;
        let response = self
            .client
            .execute(reqwest_request)
            .await
            .map_err(ErrorKind::NetworkRequest)?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(ErrorKind::ReadResponseBody)?;

        Ok(Response::new(status, headers, body.to_vec(), url))
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, HeaderValue, Method, StatusCode};
    use url::Url;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{ReqwestTransport, Transport};
    use crate::{Request, RequestOptions};

    #[tokio::test]
    async fn test_send_reads_status_headers_and_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(query_param("q", "rust"))
            .and(header("x-custom", "yes"))
            .and(body_string("payload"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-ratelimit-remaining", "41")
                    .set_body_string("created"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("yes"));
        let options = RequestOptions::builder()
            .headers(headers)
            .query(vec![("q".to_string(), "rust".to_string())])
            .body(b"payload".to_vec())
            .build();
        let url = Url::parse(&format!("{}/search", mock_server.uri())).unwrap();
        let request = Request::new(Method::POST, url, options);

        let transport = ReqwestTransport::new(reqwest::Client::new());
        let response = transport.send(&request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "41");
        assert_eq!(response.text(), "created");
    }

    #[tokio::test]
    async fn test_send_reports_connection_failure() {
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        let request = Request::new(Method::GET, url, RequestOptions::default());

        let transport = ReqwestTransport::new(reqwest::Client::new());
        let err = transport.send(&request).await.unwrap_err();
        assert!(err.reqwest_error().is_some());
    }
}
