use std::{fmt::Display, time::Duration};

use http::{HeaderMap, HeaderValue, Method, header};
use serde::Serialize;
use typed_builder::TypedBuilder;
use url::Url;

use crate::Result;

/// Per-call options for [`crate::Client::execute`].
///
/// Everything is optional; the client's defaults apply to whatever is left
/// unset.
///
/// ```
/// use quotient_lib::RequestOptions;
/// use std::time::Duration;
///
/// let options = RequestOptions::builder()
///     .query(vec![("per_page".to_string(), "100".to_string())])
///     .timeout(Duration::from_secs(30))
///     .build();
/// assert_eq!(options.query.len(), 1);
/// ```
#[derive(TypedBuilder, Debug, Clone, Default)]
#[builder(field_defaults(default, setter(into)))]
pub struct RequestOptions {
    /// Headers sent with this request only, on top of the client defaults
    pub headers: HeaderMap,
    /// Query string parameters appended to the URL
    pub query: Vec<(String, String)>,
    /// Raw request body
    pub body: Option<Vec<u8>>,
    /// Timeout for this request, overriding the client-wide timeout
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Serialize `value` as the JSON request body and set the matching
    /// `Content-Type` header.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = Some(serde_json::to_vec(value)?);
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }
}

/// A single logical call handed to a [`crate::Transport`].
///
/// The executor may send the same `Request` several times while retrying,
/// which is why it is borrowed by the transport rather than consumed.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method, e.g. `GET` or `POST`
    pub method: Method,
    /// Target URL, without the query parameters from `options`
    pub url: Url,
    /// Headers, query, body and timeout
    pub options: RequestOptions,
}

impl Request {
    /// Create a new request
    #[must_use]
    pub const fn new(method: Method, url: Url, options: RequestOptions) -> Self {
        Self {
            method,
            url,
            options,
        }
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
