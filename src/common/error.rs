//! Error types for chunkrep

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("Corrupted chunk: {0}")]
    Corrupted(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Invalid chunk hash: {0}")]
    InvalidHash(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer {peer} rejected request: {reason}")]
    Rejected { peer: String, reason: String },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Identity Errors ===
    #[error("Identity error: {0}")]
    Identity(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Output file already exists: {0}")]
    OutputExists(String),

    // === Run Errors ===
    #[error("A replication run is already in progress")]
    AlreadyRunning,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Did this error come from talking to a peer?
    ///
    /// Transport errors count against peer health and never abort a run.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::ConnectionFailed(_) | Error::Rejected { .. } | Error::Timeout(_)
        )
    }

    /// Is this error fatal to a run before it starts?
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::Config(_)
                | Error::Identity(_)
                | Error::OutputExists(_)
                | Error::AlreadyRunning
        )
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(Error::ConnectionFailed("refused".into()).is_transport());
        assert!(Error::Timeout("has_chunk".into()).is_transport());
        assert!(Error::Rejected {
            peer: "http://p1".into(),
            reason: "403".into()
        }
        .is_transport());
        assert!(!Error::Corrupted("abc".into()).is_transport());
        assert!(!Error::AlreadyRunning.is_transport());
    }

    #[test]
    fn test_startup_classification() {
        assert!(Error::InvalidConfig("batch_size".into()).is_startup());
        assert!(Error::OutputExists("failures.csv".into()).is_startup());
        assert!(!Error::Timeout("push".into()).is_startup());
    }
}
