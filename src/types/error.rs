//! Error types for Keyway
//!
//! Every repository reports failures through [`KeywayError`]. The resolver
//! chain only cares about the coarse [`ErrorKind`]: absence may fall through
//! to the next source, policy exclusion and everything else may not.

use hyper::StatusCode;

/// Coarse classification of a resolution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The identity has no keys in this source
    NotFound,
    /// The identity is excluded by policy
    Unavailable,
    /// Transient or programming failure
    Fatal,
}

/// Main error type for Keyway operations
#[derive(Debug, thiserror::Error)]
pub enum KeywayError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("User not available: {0}")]
    Unavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl KeywayError {
    /// Classify this error for resolver fallthrough decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            _ => ErrorKind::Fatal,
        }
    }

    /// True if the identity is simply absent from the source
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream(_)
            | Self::InvalidKey(_)
            | Self::WebSocket(_)
            | Self::Internal(_)
            | Self::Config(_)
            | Self::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Status code and client-facing body. Fatal details stay in the logs.
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = match self.kind() {
            ErrorKind::NotFound => "Not Found".to_string(),
            ErrorKind::Unavailable => "Unavailable for legal reasons".to_string(),
            ErrorKind::Fatal => match self {
                Self::BadRequest(msg) => format!("Bad Request: {msg}"),
                Self::Unauthorized(_) => "Unauthorized".to_string(),
                _ => "Internal Server Error".to_string(),
            },
        };
        (status, body)
    }
}

impl From<std::io::Error> for KeywayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for KeywayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Upstream(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for KeywayError {
    fn from(err: hyper::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<reqwest::Error> for KeywayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Upstream(format!("request timed out: {}", err))
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for KeywayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<ssh_key::Error> for KeywayError {
    fn from(err: ssh_key::Error) -> Self {
        Self::InvalidKey(err.to_string())
    }
}

/// Result type alias for Keyway operations
pub type Result<T> = std::result::Result<T, KeywayError>;
