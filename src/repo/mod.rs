//! Key repositories
//!
//! A [`KeyRepository`] resolves an identity (a username) to a set of SSH
//! public keys. Concrete sources implement the trait directly; policy and
//! ordering are added by wrapping:
//!
//! ```text
//! Blocklisted
//!   └─ Combo [ UploadableKeys, Disk, GitHubKeys ]
//! ```
//!
//! Keys for one identity are never merged across sources. The first source
//! that claims an identity owns it.

pub mod block;
pub mod cache;
pub mod combo;
pub mod disk;
pub mod github;
pub mod uploadable;

pub use block::Blocklisted;
pub use cache::{CachedResponse, ResponseCache, ResponseCacheConfig};
pub use combo::Combo;
pub use disk::Disk;
pub use github::{GitHubKeys, GitHubKeysOptions};
pub use uploadable::{Registration, UploadableKeys};

use std::fmt;

use crate::keys::PublicKey;
use crate::types::Result;

/// Which kind of source produced a key record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySource {
    Disk,
    Remote,
    Ephemeral,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Remote => "remote",
            Self::Ephemeral => "ephemeral",
        }
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys resolved for an identity, tagged with their provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub source: KeySource,
    pub keys: Vec<PublicKey>,
}

impl KeyRecord {
    pub fn new(source: KeySource, keys: Vec<PublicKey>) -> Self {
        Self { source, keys }
    }
}

/// A source of SSH public keys
///
/// Implementations must be safe to call concurrently. They may cache
/// internally but must not mutate caller-visible state.
///
/// Errors follow [`crate::types::ErrorKind`]:
/// - `NotFound` when this source has no keys for the identity
/// - `Unavailable` when policy excludes the identity
/// - anything else is fatal for the resolution
#[async_trait::async_trait]
pub trait KeyRepository: Send + Sync {
    async fn get_keys(&self, username: &str) -> Result<KeyRecord>;
}

#[async_trait::async_trait]
impl<R: KeyRepository + ?Sized> KeyRepository for std::sync::Arc<R> {
    async fn get_keys(&self, username: &str) -> Result<KeyRecord> {
        (**self).get_keys(username).await
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Scriptable repository for resolver tests

    use super::*;
    use crate::types::KeywayError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What a [`StubRepo`] answers with
    #[derive(Clone)]
    pub enum Outcome {
        Found(KeyRecord),
        NotFound,
        Unavailable,
        Fatal,
    }

    /// Repository returning a fixed outcome and counting its calls
    pub struct StubRepo {
        outcome: Outcome,
        calls: AtomicUsize,
    }

    impl StubRepo {
        pub fn new(outcome: Outcome) -> Self {
            Self {
                outcome,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl KeyRepository for StubRepo {
        async fn get_keys(&self, username: &str) -> Result<KeyRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Outcome::Found(record) => Ok(record.clone()),
                Outcome::NotFound => Err(KeywayError::NotFound(username.to_string())),
                Outcome::Unavailable => Err(KeywayError::Unavailable(username.to_string())),
                Outcome::Fatal => Err(KeywayError::Upstream("stub failure".into())),
            }
        }
    }
}
