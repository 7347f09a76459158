//! Composite resolver
//!
//! Tries each repository in order. `NotFound` falls through to the next
//! source; success, `Unavailable` and fatal errors stop the chain.

use std::sync::Arc;
use tracing::debug;

use super::{KeyRecord, KeyRepository};
use crate::types::{KeywayError, Result};

/// Ordered, non-empty list of repositories
pub struct Combo {
    repos: Vec<Arc<dyn KeyRepository>>,
}

impl Combo {
    /// Create a resolver chain. The list must not be empty.
    pub fn new(repos: Vec<Arc<dyn KeyRepository>>) -> Result<Self> {
        if repos.is_empty() {
            return Err(KeywayError::Config(
                "resolver chain needs at least one repository".into(),
            ));
        }
        Ok(Self { repos })
    }

    /// Number of repositories in the chain
    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

#[async_trait::async_trait]
impl KeyRepository for Combo {
    async fn get_keys(&self, username: &str) -> Result<KeyRecord> {
        let mut last = None;

        for (index, repo) in self.repos.iter().enumerate() {
            match repo.get_keys(username).await {
                Err(e) if e.is_not_found() => {
                    debug!(identity = %username, index, "Not found in source, trying next");
                    last = Some(e);
                }
                result => return result,
            }
        }

        // the list is never empty, so `last` is always set here
        Err(last.unwrap_or_else(|| KeywayError::NotFound(username.to_string())))
    }
}
