//! Parse quota feedback out of response headers.
//!
//! Parsing is total: every field of a [`QuotaSnapshot`] is either
//! [`HeaderField::Absent`], [`HeaderField::Invalid`] or
//! [`HeaderField::Present`], so a malformed header is something callers
//! can see (and tests can assert on) instead of a silently ignored error.

use http::{HeaderMap, HeaderValue};
use std::time::{Duration, SystemTime};
use thiserror::Error;

const LIMIT_HEADERS: &[&str] = &["x-ratelimit-limit", "x-rate-limit-limit", "ratelimit-limit"];
const REMAINING_HEADERS: &[&str] = &[
    "x-ratelimit-remaining",
    "x-rate-limit-remaining",
    "ratelimit-remaining",
];
const RESET_HEADERS: &[&str] = &["x-ratelimit-reset", "x-rate-limit-reset"];
const RETRY_AFTER_HEADER: &str = "retry-after";

/// One parsed header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderField<T> {
    /// The server did not send the header
    #[default]
    Absent,
    /// The header was sent but could not be parsed
    Invalid,
    /// The header was sent and parsed
    Present(T),
}

impl<T> HeaderField<T> {
    /// The parsed value, if there is one
    pub const fn get(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent | Self::Invalid => None,
        }
    }

    /// Whether the header was sent and parsed
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    fn from_result<E>(result: Option<Result<T, E>>) -> Self {
        match result {
            None => Self::Absent,
            Some(Ok(value)) => Self::Present(value),
            Some(Err(_)) => Self::Invalid,
        }
    }
}

/// Quota and backoff signals carried by a single response.
///
/// A snapshot is derived per response and only lives long enough to feed
/// the interval controller and the executor's classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaSnapshot {
    /// Requests allowed per quota window (`X-RateLimit-Limit`)
    pub limit: HeaderField<u64>,
    /// Requests left in the current window (`X-RateLimit-Remaining`)
    pub remaining: HeaderField<u64>,
    /// When the current window resets (`X-RateLimit-Reset`, unix seconds)
    pub reset_at: HeaderField<SystemTime>,
    /// Explicit wait requested by the server (`Retry-After`)
    pub retry_after: HeaderField<Duration>,
}

impl QuotaSnapshot {
    /// Parse the quota headers of a response.
    ///
    /// `now` is only used to turn an HTTP-date `Retry-After` into a
    /// duration.
    #[must_use]
    pub fn parse(headers: &HeaderMap, now: SystemTime) -> Self {
        Self {
            limit: parse_number(headers, LIMIT_HEADERS),
            remaining: parse_number(headers, REMAINING_HEADERS),
            reset_at: HeaderField::from_result(
                find_header(headers, RESET_HEADERS).map(parse_reset),
            ),
            retry_after: HeaderField::from_result(
                headers
                    .get(RETRY_AFTER_HEADER)
                    .map(|value| parse_retry_after(value, now)),
            ),
        }
    }

    /// Whether the server reported that no requests are left in this window
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == HeaderField::Present(0)
    }

    /// Time until the reported window reset, relative to `now`.
    ///
    /// Returns `None` if the reset time is missing or malformed, and
    /// `Duration::ZERO` if it is already in the past.
    #[must_use]
    pub fn reset_in(&self, now: SystemTime) -> Option<Duration> {
        self.reset_at
            .get()
            .map(|reset_at| reset_at.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum HeaderParseError {
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// Parse the "Retry-After" header as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3).
///
/// Fractional seconds are accepted as well, since some APIs send them.
pub(crate) fn parse_retry_after(
    value: &HeaderValue,
    now: SystemTime,
) -> Result<Duration, HeaderParseError> {
    let value = value
        .to_str()
        .map_err(|_| HeaderParseError::HeaderValueError)?
        .trim();

    // RFC 7231: Retry-After = HTTP-date / delay-seconds
    match value.parse::<f64>() {
        Ok(seconds) => Duration::try_from_secs_f64(seconds)
            .map_err(|_| HeaderParseError::ValueError(value.into())),
        Err(_) => httpdate::parse_http_date(value)
            .map(|date| {
                date.duration_since(now)
                    // if date is in the past, we can use ZERO
                    .unwrap_or(Duration::ZERO)
            })
            .map_err(|_| HeaderParseError::ValueError(value.into())),
    }
}

fn parse_reset(value: &HeaderValue) -> Result<SystemTime, HeaderParseError> {
    let secs = parse_u64(value)?;
    SystemTime::UNIX_EPOCH
        .checked_add(Duration::from_secs(secs))
        .ok_or_else(|| HeaderParseError::ValueError(secs.to_string()))
}

fn parse_u64(value: &HeaderValue) -> Result<u64, HeaderParseError> {
    let value = value
        .to_str()
        .map_err(|_| HeaderParseError::HeaderValueError)?
        .trim();
    value
        .parse::<u64>()
        .map_err(|_| HeaderParseError::ValueError(value.into()))
}

/// Helper method to parse numeric header values from common rate limit headers
fn parse_number(headers: &HeaderMap, header_names: &[&str]) -> HeaderField<u64> {
    HeaderField::from_result(find_header(headers, header_names).map(parse_u64))
}

/// The first of `header_names` that is present; spellings are tried in order
fn find_header<'a>(headers: &'a HeaderMap, header_names: &[&str]) -> Option<&'a HeaderValue> {
    header_names.iter().find_map(|name| headers.get(*name))
}
