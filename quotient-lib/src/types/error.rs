use http::StatusCode;
use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

/// Possible errors when sending requests through `quotient_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The transport could not deliver the request, e.g. a connection,
    /// DNS or TLS failure reported by reqwest.
    #[error("Network error while sending the request: {0}")]
    NetworkRequest(#[source] reqwest::Error),

    /// A failure reported by a custom [`crate::Transport`] implementation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response arrived but its body could not be read to the end.
    #[error("Error reading response body: {0}")]
    ReadResponseBody(#[source] reqwest::Error),

    /// The underlying reqwest client could not be constructed.
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// A default or per-request header value is not a valid header.
    #[error("Header could not be parsed: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// The request URL could not be parsed.
    #[error("Cannot parse `{0}` as a URL: {1}")]
    InvalidUrl(String, #[source] url::ParseError),

    /// The request body could not be serialized as JSON.
    #[error("Cannot serialize request body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// The rate limit configuration violates one of its constraints.
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    /// The quota kept the request waiting for longer than the configured
    /// `max_quota_wait`.
    #[error(
        "Gave up after waiting {}s for quota to recover (last status: {status})",
        waited.as_secs()
    )]
    QuotaWaitExceeded {
        /// Total time already spent in quota waits for this call
        waited: Duration,
        /// Status of the last response that asked us to wait
        status: StatusCode,
    },
}

impl ErrorKind {
    /// Return the underlying `reqwest` error, if any
    #[must_use]
    pub const fn reqwest_error(&self) -> Option<&reqwest::Error> {
        match self {
            Self::NetworkRequest(e) | Self::ReadResponseBody(e) | Self::BuildRequestClient(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_wait_exceeded_message() {
        let err = ErrorKind::QuotaWaitExceeded {
            waited: Duration::from_secs(90),
            status: StatusCode::FORBIDDEN,
        };
        assert_eq!(
            err.to_string(),
            "Gave up after waiting 90s for quota to recover (last status: 403 Forbidden)"
        );
    }

    #[test]
    fn test_serialize_as_display() {
        let err = ErrorKind::Transport("connection reset".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Transport error: connection reset\"");
    }
}
