//! SSH public keys
//!
//! [`PublicKey`] wraps an [`ssh_key::PublicKey`] together with its canonical
//! authorized_keys encoding (`<algorithm> <base64>`, comment stripped). Keys
//! are immutable once parsed.

use ssh_key::authorized_keys::Entry;
use ssh_key::HashAlg;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::types::{KeywayError, Result};

/// A parsed SSH public key
#[derive(Clone)]
pub struct PublicKey {
    inner: ssh_key::PublicKey,
    canonical: String,
}

impl PublicKey {
    /// Parse a single authorized_keys line.
    ///
    /// Options and a trailing comment are accepted; neither survives into the
    /// canonical form.
    pub fn parse_authorized_key(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(KeywayError::InvalidKey("empty key".into()));
        }

        let entry = Entry::from_str(line)?;
        Self::from_ssh(entry.public_key().clone())
    }

    fn from_ssh(mut inner: ssh_key::PublicKey) -> Result<Self> {
        inner.set_comment("");
        let canonical = inner.to_openssh()?;
        Ok(Self { inner, canonical })
    }

    /// Canonical one-line authorized_keys form
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Key algorithm name, e.g. `ssh-ed25519`
    pub fn algorithm(&self) -> String {
        self.inner.algorithm().to_string()
    }

    /// SHA-256 fingerprint (`SHA256:...`)
    pub fn fingerprint(&self) -> String {
        self.inner.fingerprint(HashAlg::Sha256).to_string()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for PublicKey {}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({} {})", self.algorithm(), self.fingerprint())
    }
}

impl FromStr for PublicKey {
    type Err = KeywayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_authorized_key(s)
    }
}

/// Parse the contents of an authorized_keys file.
///
/// Blank lines and `#` comments are skipped. Lines that fail to parse are
/// skipped as well, so a single bad entry does not hide the rest of the file.
pub fn parse_authorized_keys(contents: &[u8]) -> Vec<PublicKey> {
    let text = String::from_utf8_lossy(contents);

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match PublicKey::parse_authorized_key(line) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(error = %e, "Skipping unparseable authorized_keys line");
                None
            }
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testdata::*;
    use super::*;

    #[test]
    fn test_parse_strips_comment() {
        let key = PublicKey::parse_authorized_key(&format!("{ED25519_A} alice@laptop")).unwrap();
        assert_eq!(key.as_str(), ED25519_A);
        assert_eq!(key.algorithm(), "ssh-ed25519");
        assert!(key.fingerprint().starts_with("SHA256:"));
    }

    #[test]
    fn test_parse_with_options() {
        let line = format!("no-pty,command=\"/bin/true\" {ED25519_B} deploy");
        let key = PublicKey::parse_authorized_key(&line).unwrap();
        assert_eq!(key.as_str(), ED25519_B);
    }

    #[test]
    fn test_parse_rsa() {
        let key: PublicKey = RSA.parse().unwrap();
        assert_eq!(key.algorithm(), "ssh-rsa");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PublicKey::parse_authorized_key("").is_err());
        assert!(PublicKey::parse_authorized_key("   \n").is_err());
        assert!(PublicKey::parse_authorized_key("hello world").is_err());
        assert!(PublicKey::parse_authorized_key("ssh-ed25519 not-base64!!").is_err());
    }

    #[test]
    fn test_parse_file_skips_noise() {
        let file = format!(
            "# keys for alice\n\n{ED25519_A} first\nthis line is broken\n  {ED25519_B}  \n"
        );
        let keys = parse_authorized_keys(file.as_bytes());
        assert_eq!(keys, vec![key(ED25519_A), key(ED25519_B)]);
    }

    #[test]
    fn test_parse_file_empty() {
        assert!(parse_authorized_keys(b"").is_empty());
        assert!(parse_authorized_keys(b"# nothing here\n").is_empty());
    }
}
