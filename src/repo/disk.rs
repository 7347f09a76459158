//! Disk source
//!
//! Resolves an identity by reading the authorized_keys file named after it
//! from a configured directory.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::{KeyRecord, KeyRepository, KeySource};
use crate::keys::parse_authorized_keys;
use crate::types::{KeywayError, Result};

/// Reads keys from files named after the identity
pub struct Disk {
    root: PathBuf,
}

impl Disk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the key file for an identity.
    ///
    /// Returns `None` unless the identity is a single plain file name; such an
    /// identity can never name a file directly inside the root.
    fn path(&self, username: &str) -> Option<PathBuf> {
        let mut components = Path::new(username).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == username => {
                Some(self.root.join(name))
            }
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl KeyRepository for Disk {
    async fn get_keys(&self, username: &str) -> Result<KeyRecord> {
        let Some(path) = self.path(username) else {
            debug!(identity = %username, "Identity is not a valid file name");
            return Err(KeywayError::NotFound(username.to_string()));
        };

        match tokio::fs::read(&path).await {
            Ok(contents) => {
                let keys = parse_authorized_keys(&contents);
                debug!(identity = %username, count = keys.len(), "Loaded keys from disk");
                Ok(KeyRecord::new(KeySource::Disk, keys))
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(KeywayError::NotFound(username.to_string()))
            }
            Err(e) => Err(KeywayError::Internal(format!(
                "reading {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::testdata::{key, ED25519_A, ED25519_B};
    use crate::types::ErrorKind;

    #[tokio::test]
    async fn test_reads_file_named_after_identity() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("alice"),
            format!("{ED25519_A} a@host\n{ED25519_B}\n"),
        )
        .unwrap();

        let disk = Disk::new(dir.path());
        let record = disk.get_keys("alice").await.unwrap();
        assert_eq!(record.source, KeySource::Disk);
        assert_eq!(record.keys, vec![key(ED25519_A), key(ED25519_B)]);
    }

    #[tokio::test]
    async fn test_identity_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice"), ED25519_A).unwrap();

        let disk = Disk::new(dir.path());
        assert!(disk.get_keys("alice").await.is_ok());
        // case-insensitive filesystems may still find it; only assert on
        // case-sensitive ones
        if !dir.path().join("ALICE").exists() {
            assert!(disk.get_keys("ALICE").await.unwrap_err().is_not_found());
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::new(dir.path());
        let err = disk.get_keys("nobody").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_path_traversal_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice"), ED25519_A).unwrap();
        let disk = Disk::new(dir.path().join("sub"));

        for name in ["../alice", "a/b", "..", ".", ""] {
            assert!(disk.get_keys(name).await.unwrap_err().is_not_found(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_directory_read_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bob")).unwrap();

        let disk = Disk::new(dir.path());
        let err = disk.get_keys("bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}
