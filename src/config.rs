//! Configuration for Keyway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Keyway - SSH public keys by username over HTTP
#[derive(Parser, Debug, Clone)]
#[command(name = "keyway")]
#[command(about = "Serves authorized_keys files for GitHub users, local key files and uploaded keys")]
#[command(version)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// GitHub token used as bearer credential for the API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// GitHub API base URL (GitHub Enterprise or a test upstream)
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// Timeout for a single GitHub API request in milliseconds
    #[arg(long, env = "API_TIMEOUT_MS", default_value = "1000")]
    pub api_timeout_ms: u64,

    /// Maximum size of cached GitHub responses in bytes (0 disables the cache)
    #[arg(long, env = "CACHE_SIZE", default_value = "25000")]
    pub cache_size: usize,

    /// Maximum age of cached GitHub responses in seconds (0 never expires)
    #[arg(long, env = "CACHE_AGE_SECS", default_value = "3600")]
    pub cache_age_secs: u64,

    /// Directory of authorized_keys files named after users, checked before GitHub
    #[arg(long, env = "AKPATH")]
    pub akpath: Option<PathBuf>,

    /// Comma-separated users to refuse for legal reasons
    #[arg(long, env = "LEGAL_BLOCK")]
    pub legal_block: Option<String>,

    /// Allow temporary key uploads at /_/upload/
    #[arg(long, env = "ALLOW_UPLOADS", default_value = "false")]
    pub allow_uploads: bool,

    /// Require user:password basic auth for uploads (implies --allow-uploads).
    /// The password may be given as an Argon2 PHC hash.
    #[arg(long, env = "UPLOAD_AUTH", hide_env_values = true)]
    pub upload_auth: Option<String>,

    /// Prefix of identities generated for uploaded keys
    #[arg(long, env = "UPLOAD_PREFIX", default_value = "uploaded-")]
    pub upload_prefix: String,

    /// File served at / instead of the built-in index page
    #[arg(long, env = "INDEX_HTML")]
    pub index: Option<PathBuf>,

    /// File served at /robots.txt instead of the built-in one
    #[arg(long, env = "ROBOTS_TXT")]
    pub robots: Option<PathBuf>,

    /// HTML appended to every HTML page
    #[arg(long, env = "SUFFIX_HTML")]
    pub suffix: Option<PathBuf>,

    /// Directory served under /_/
    #[arg(long, env = "SERVE_PATH")]
    pub serve: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Whether the ephemeral registry and upload endpoint are enabled
    pub fn uploads_enabled(&self) -> bool {
        self.allow_uploads || self.upload_auth.is_some()
    }

    /// Blocked users from `--legal-block`
    pub fn blocklist(&self) -> Vec<String> {
        self.legal_block
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref auth) = self.upload_auth {
            match auth.split_once(':') {
                None => return Err("UPLOAD_AUTH must be of the form user:password".to_string()),
                Some(("", _)) => return Err("UPLOAD_AUTH username must not be empty".to_string()),
                Some(_) => {}
            }
        }

        if self.api_timeout_ms == 0 {
            return Err("API_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.upload_prefix.is_empty()
            || !self
                .upload_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err("UPLOAD_PREFIX must be non-empty and only contain [A-Za-z0-9-]".to_string());
        }

        Ok(())
    }
}
