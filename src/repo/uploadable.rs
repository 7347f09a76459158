//! Ephemeral key registry
//!
//! Maps generated identities to keys submitted over a live connection. An
//! entry lives exactly as long as the [`Registration`] handle returned for it.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{KeyRecord, KeyRepository, KeySource};
use crate::keys::PublicKey;
use crate::types::{KeywayError, Result};

/// Length of the random part of a generated identity
pub const IDENTITY_LENGTH: usize = 10;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone)]
struct RegistryEntry {
    keys: Vec<PublicKey>,
    created_at: DateTime<Utc>,
}

/// In-memory registry of uploaded keys
pub struct UploadableKeys {
    prefix: String,
    counter: AtomicU64,
    entries: Arc<DashMap<String, RegistryEntry>>,
}

impl UploadableKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Store keys under a freshly generated identity.
    ///
    /// Identity generation happens outside the map lock; only the vacancy
    /// check and insert hold it.
    pub fn register(&self, keys: Vec<PublicKey>) -> Registration {
        loop {
            let identity = self.generate_identity();
            match self.entries.entry(identity.clone()) {
                Entry::Occupied(_) => {
                    debug!(identity = %identity, "Generated identity collided, retrying");
                }
                Entry::Vacant(slot) => {
                    slot.insert(RegistryEntry {
                        keys,
                        created_at: Utc::now(),
                    });
                    debug!(identity = %identity, "Registered uploaded keys");
                    return Registration {
                        identity,
                        entries: Arc::clone(&self.entries),
                        revoked: AtomicBool::new(false),
                    };
                }
            }
        }
    }

    fn generate_identity(&self) -> String {
        match random_alphanumeric(IDENTITY_LENGTH) {
            Ok(suffix) => format!("{}{}", self.prefix, suffix),
            Err(e) => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Randomness unavailable, using counter identity");
                format!("{}{}", self.prefix, n)
            }
        }
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// When the identity was registered, if it is live
    pub fn created_at(&self, identity: &str) -> Option<DateTime<Utc>> {
        self.entries.get(identity).map(|entry| entry.created_at)
    }
}

#[async_trait::async_trait]
impl KeyRepository for UploadableKeys {
    async fn get_keys(&self, username: &str) -> Result<KeyRecord> {
        match self.entries.get(username) {
            Some(entry) => Ok(KeyRecord::new(KeySource::Ephemeral, entry.keys.clone())),
            None => Err(KeywayError::NotFound(username.to_string())),
        }
    }
}

/// Uniformly random alphanumeric string from the OS generator
fn random_alphanumeric(length: usize) -> std::result::Result<String, rand::Error> {
    // largest multiple of the alphabet size that fits in a byte
    let limit = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

    let mut out = String::with_capacity(length);
    let mut buf = [0u8; 32];
    while out.len() < length {
        OsRng.try_fill_bytes(&mut buf)?;
        out.extend(
            buf.iter()
                .filter(|b| **b < limit)
                .take(length - out.len())
                .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char),
        );
    }
    Ok(out)
}

/// Handle to one registry entry. Revoked on drop.
pub struct Registration {
    identity: String,
    entries: Arc<DashMap<String, RegistryEntry>>,
    revoked: AtomicBool,
}

impl Registration {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Remove the entry. Later calls are no-ops.
    pub fn revoke(&self) {
        if self.revoked.swap(true, Ordering::AcqRel) {
            return;
        }
        self.entries.remove(&self.identity);
        debug!(identity = %self.identity, "Revoked uploaded keys");
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.revoke();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("identity", &self.identity)
            .field("revoked", &self.revoked.load(Ordering::Relaxed))
            .finish()
    }
}
