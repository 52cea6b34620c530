//! Error Module
//!
//! Defines error types and result types used throughout the tier manager.

use thiserror::Error;

/// Main error type for the tier manager
#[derive(Error, Debug, Clone)]
pub enum ManagerError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Path traversal: {0}")]
    PathTraversal(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("Copy failed: {0}")]
    CopyFailed(String),

    #[error("Verification mismatch: {0}")]
    VerificationMismatch(String),

    #[error("Lock already held: {0}")]
    LockHeld(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Metadata source error: {0}")]
    MetadataError(String),

    #[error("Notification target unreachable: {0}")]
    NotifyUnreachable(String),

    #[error("Dispatch error: {0}")]
    DispatchError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for ManagerError {
    fn from(err: std::io::Error) -> Self {
        ManagerError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ManagerError {
    fn from(err: serde_json::Error) -> Self {
        ManagerError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ManagerError {
    fn from(err: serde_yaml::Error) -> Self {
        ManagerError::SerializationError(err.to_string())
    }
}

/// Result type alias for the tier manager
pub type Result<T> = std::result::Result<T, ManagerError>;
