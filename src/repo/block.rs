//! Blocklist decorator
//!
//! Rejects a fixed set of identities (case-insensitive) before the wrapped
//! repository is consulted. The set is loaded once and never mutated, so no
//! locking is needed.

use std::collections::HashSet;
use tracing::info;

use super::{KeyRecord, KeyRepository};
use crate::types::{KeywayError, Result};

/// Wraps a repository and blocks a list of users, typically for legal reasons
pub struct Blocklisted<R> {
    inner: R,
    blocked: HashSet<String>,
}

impl<R: KeyRepository> Blocklisted<R> {
    pub fn new<I, S>(inner: R, blocked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocked = blocked
            .into_iter()
            .map(|user| user.as_ref().trim().to_lowercase())
            .filter(|user| !user.is_empty())
            .collect();
        Self { inner, blocked }
    }

    /// True if the identity is on the blocklist
    pub fn is_blocked(&self, username: &str) -> bool {
        !self.blocked.is_empty() && self.blocked.contains(&username.to_lowercase())
    }

    /// Number of blocked identities
    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }
}

#[async_trait::async_trait]
impl<R: KeyRepository> KeyRepository for Blocklisted<R> {
    async fn get_keys(&self, username: &str) -> Result<KeyRecord> {
        if self.is_blocked(username) {
            info!(identity = %username, "Refusing blocklisted identity");
            return Err(KeywayError::Unavailable(username.to_string()));
        }

        self.inner.get_keys(username).await
    }
}
