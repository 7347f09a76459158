//! Shared types for Keyway

pub mod error;

pub use error::{ErrorKind, KeywayError, Result};
