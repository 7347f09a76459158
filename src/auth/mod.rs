//! Upload gate
//!
//! Provides:
//! - HTTP Basic credential parsing
//! - Password hashing with Argon2

pub mod basic;
pub mod password;

pub use basic::{parse_basic_auth, UploadGate, REALM};
pub use password::{hash_password, is_password_hash, verify_password};
