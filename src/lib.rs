//! Keyway - SSH public keys by username over HTTP
//!
//! Resolves a username to SSH public keys and serves them as an
//! authorized_keys file, a setup script or a web page.
//!
//! ## Sources
//!
//! - **Uploads**: keys submitted over a WebSocket, live while it stays open
//! - **Disk**: authorized_keys files named after users
//! - **GitHub**: the public keys of GitHub users, cached
//!
//! Sources are tried in that order; a blocklist is applied in front of all
//! of them.

pub mod auth;
pub mod config;
pub mod format;
pub mod keys;
pub mod repo;
pub mod server;
pub mod types;
pub mod ws;

pub use config::Args;
pub use keys::PublicKey;
pub use repo::{KeyRecord, KeyRepository, KeySource};
pub use server::{run, AppState};
pub use types::{ErrorKind, KeywayError, Result};
