use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;
use std::sync::Arc;

use crate::ratelimit::{Identity, IdentityKey, IdentityStats, IdentityStatsMap};
use crate::{Client, ClientBuilder, Result};

/// Hands out clients that share pacing state per identity.
///
/// Requests sent under the same token draw from the same server-side
/// quota, so every client the pool builds for that token is attached to
/// the same [`Identity`]. Different tokens never share anything.
///
/// # Architecture
///
/// - Identities are created lazily on the first request for a token
/// - The first builder seen for a token decides its [`crate::RateLimitConfig`]
/// - Thread-safe using `DashMap` for concurrent access to identities
///
/// # Examples
///
/// ```
/// use quotient_lib::{ClientBuilder, ClientPool};
/// use secrecy::SecretString;
///
/// # fn main() -> quotient_lib::Result<()> {
/// let pool = ClientPool::new();
/// let builder = ClientBuilder::builder()
///     .token(SecretString::from("ghp_example"))
///     .build();
///
/// let a = pool.client(builder.clone())?;
/// let b = pool.client(builder)?;
/// assert!(std::sync::Arc::ptr_eq(a.identity(), b.identity()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientPool {
    /// Map of identity fingerprints to their shared state
    identities: Arc<DashMap<IdentityKey, Arc<Identity>>>,
}

impl ClientPool {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client from `builder`, attached to the pooled identity of
    /// its token.
    ///
    /// # Errors
    ///
    /// Returns an `Err` for the same reasons as [`ClientBuilder::client`].
    pub fn client(&self, builder: ClientBuilder) -> Result<Client> {
        builder.rate_limit().validate()?;
        let identity = self.get_or_create_identity(&builder)?;
        builder.client_with_identity(identity)
    }

    fn get_or_create_identity(&self, builder: &ClientBuilder) -> Result<Arc<Identity>> {
        let key = builder.identity_key();
        match self.identities.entry(key) {
            Entry::Occupied(entry) => {
                let identity = entry.get();
                if identity.config() != builder.rate_limit() {
                    debug!(
                        "Identity {} already exists, ignoring the rate limit configuration of the new client",
                        identity.key
                    );
                }
                Ok(identity.clone())
            }
            Entry::Vacant(entry) => {
                debug!("Creating identity {}", entry.key());
                Ok(entry.insert(Arc::new(builder.new_identity()?)).clone())
            }
        }
    }

    /// Get the identity for a key, if any client was built for it
    #[must_use]
    pub fn identity(&self, key: &IdentityKey) -> Option<Arc<Identity>> {
        self.identities.get(key).map(|entry| entry.value().clone())
    }

    /// Get statistics for a specific identity
    #[must_use]
    pub fn identity_stats(&self, key: &IdentityKey) -> IdentityStats {
        self.identity(key)
            .map(|identity| identity.stats())
            .unwrap_or_default()
    }

    /// Get statistics for all identities that have been used
    #[must_use]
    pub fn all_stats(&self) -> IdentityStatsMap {
        self.identities
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().stats()))
            .collect::<std::collections::HashMap<_, _>>()
            .into()
    }

    /// Number of identities currently tracked
    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }
}
