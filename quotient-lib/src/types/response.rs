use std::borrow::Cow;

use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// A fully buffered HTTP response.
///
/// The body is read eagerly so a response can be inspected by the
/// executor, retried or returned without holding on to the connection.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    url: Url,
}

impl Response {
    /// Create a response from its parts
    #[must_use]
    pub const fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>, url: Url) -> Self {
        Self {
            status,
            headers,
            body,
            url,
        }
    }

    /// The response status code
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw response body
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The final URL of the response, after redirects
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// The body decoded as UTF-8, replacing invalid sequences
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserialize the body as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Split the response into status, headers and body
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Vec<u8>) {
        (self.status, self.headers, self.body)
    }
}
