//! volrepl Error Types

use thiserror::Error;

use crate::replication::protocol::Status;

/// Result type alias for volrepl operations
pub type Result<T> = std::result::Result<T, Error>;

/// volrepl error types
#[derive(Error, Debug)]
pub enum Error {
    // Usage errors
    #[error("volume id missing")]
    MissingIdentifier,

    #[error("{0}")]
    Usage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Connection errors
    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Connection lost to {0}")]
    ConnectionLost(String),

    // Remote errors
    #[error("{0}")]
    Remote(Status),

    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    // Wire errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Reported before any network activity
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::MissingIdentifier | Error::Usage(_) | Error::Config(_) | Error::ConfigParse(_))
    }

    /// Channel could not be established or maintained
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout(_) | Error::ConnectionLost(_)
        )
    }

    /// Backend rejected the request or the deadline elapsed
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote(_))
    }

    /// Remote status, if this is a remote error
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Remote(status) => Some(status),
            _ => None,
        }
    }
}
