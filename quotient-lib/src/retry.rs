use std::io;

use http::StatusCode;

use crate::ErrorKind;

/// An extension trait to help determine if a failed send is worth
/// repeating.
///
/// Quota refusals are not covered here. They are recognised from the
/// quota headers by the executor and never count as an attempt.
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for StatusCode {
    /// Statuses that usually go away on their own: rate limiting and
    /// overloaded or flaky upstreams.
    fn should_retry(&self) -> bool {
        matches!(
            *self,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    }
}

impl RetryExt for reqwest::Error {
    #[allow(clippy::if_same_then_else)]
    fn should_retry(&self) -> bool {
        if self.is_builder() || self.is_redirect() || self.is_decode() {
            // The same request would fail in the same way again
            false
        } else if self.is_timeout() || self.is_connect() || self.is_body() {
            true
        } else if self.is_request() {
            true
        } else if let Some(status) = self.status() {
            status.should_retry()
        } else if let Some(io_error) = get_source_error_type::<io::Error>(self) {
            should_retry_io(io_error)
        } else {
            false
        }
    }
}

impl RetryExt for ErrorKind {
    fn should_retry(&self) -> bool {
        match self {
            Self::NetworkRequest(e) | Self::ReadResponseBody(e) => e.should_retry(),
            Self::Transport(_) => true,
            _ => false,
        }
    }
}

/// Classifies an `io::Error` into retryable or not.
fn should_retry_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

/// Downcasts the given err source into T.
fn get_source_error_type<T: std::error::Error + 'static>(
    err: &dyn std::error::Error,
) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }

        source = err.source();
    }
    None
}
