use ring::digest::{SHA256, digest};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fmt::{self, Write};

/// Number of digest bytes kept in a fingerprint
const FINGERPRINT_BYTES: usize = 12;

const ANONYMOUS: &str = "anonymous";

/// A type-safe handle for the credential under which quota is tracked.
///
/// Two clients with the same token share one [`IdentityKey`] and therefore
/// one pacing state. The raw token is never stored: the key only holds a
/// truncated SHA-256 fingerprint of it, so it is safe to log and to print
/// in statistics.
///
/// # Examples
///
/// ```
/// use quotient_lib::ratelimit::IdentityKey;
/// use secrecy::SecretString;
///
/// let token = SecretString::from("ghp_example");
/// let key = IdentityKey::from_token(Some(&token));
/// assert!(key.as_str().starts_with("sha256:"));
/// assert_eq!(IdentityKey::from_token(None).as_str(), "anonymous");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derive the key for an optional bearer token.
    /// Empty tokens count as anonymous.
    #[must_use]
    pub fn from_token(token: Option<&SecretString>) -> Self {
        match token.map(|token| token.expose_secret()) {
            Some(token) if !token.is_empty() => Self(fingerprint(token)),
            _ => Self::anonymous(),
        }
    }

    /// The key shared by all unauthenticated clients
    #[must_use]
    pub fn anonymous() -> Self {
        Self(ANONYMOUS.to_string())
    }

    /// Whether this key belongs to unauthenticated clients
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

fn fingerprint(token: &str) -> String {
    let hash = digest(&SHA256, token.as_bytes());
    hash.as_ref()[..FINGERPRINT_BYTES].iter().fold(
        String::from("sha256:"),
        |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        },
    )
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Option<&SecretString>> for IdentityKey {
    fn from(token: Option<&SecretString>) -> Self {
        Self::from_token(token)
    }
}
