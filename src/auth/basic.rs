//! HTTP Basic credentials for the upload gate

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use super::password::{hash_password, is_password_hash, verify_password};
use crate::types::{KeywayError, Result};

/// Realm announced in `WWW-Authenticate`
pub const REALM: &str = "keyway upload";

/// Single static username/password pair guarding uploads
pub struct UploadGate {
    username: String,
    password_hash: String,
}

impl UploadGate {
    /// Build a gate from `user:password`. A password that is already an
    /// Argon2 PHC string is used as the hash.
    pub fn from_credentials(credentials: &str) -> Result<Self> {
        let (username, password) = credentials
            .split_once(':')
            .ok_or_else(|| KeywayError::Config("upload auth must be user:password".into()))?;
        if username.is_empty() {
            return Err(KeywayError::Config("upload auth username is empty".into()));
        }

        let password_hash = if is_password_hash(password) {
            password.to_string()
        } else {
            hash_password(password)?
        };

        Ok(Self {
            username: username.to_string(),
            password_hash,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check an `Authorization` header value
    pub fn check(&self, authorization: Option<&str>) -> Result<()> {
        let Some((username, password)) = authorization.and_then(parse_basic_auth) else {
            debug!("Upload request without basic credentials");
            return Err(KeywayError::Unauthorized("missing credentials".into()));
        };

        let password_ok = match verify_password(&password, &self.password_hash) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "Upload gate hash is unusable");
                false
            }
        };

        if username == self.username && password_ok {
            Ok(())
        } else {
            debug!(username = %username, "Upload credentials rejected");
            Err(KeywayError::Unauthorized("invalid credentials".into()))
        }
    }

    /// `WWW-Authenticate` challenge value
    pub fn challenge(&self) -> String {
        format!("Basic realm=\"{REALM}\"")
    }
}

/// Decode `Basic <base64(user:password)>`
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}
