//! SDK error types using thiserror 2.0.
//!
//! Errors raised by the host-side collaborators (storage, system view,
//! templates) with retryability classification.

use credential_random::PolicyError;
use rust_common::{PlatformError, Retryable};
use thiserror::Error;

/// Errors surfaced by host interfaces.
#[derive(Error, Debug)]
pub enum SdkError {
    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A request field failed validation
    #[error("{0}")]
    InvalidRequest(String),

    /// The path exists but does not support the operation
    #[error("unsupported operation")]
    UnsupportedOperation,

    /// No handler for the path
    #[error("unsupported path: {0}")]
    UnsupportedPath(String),

    /// Caller lacks access
    #[error("permission denied")]
    PermissionDenied,

    /// Resource not found on the host
    #[error("not found: {0}")]
    NotFound(String),

    /// Username template could not be parsed or rendered
    #[error("template error: {0}")]
    Template(String),

    /// Password policy evaluation failed
    #[error("password policy error: {0}")]
    Policy(#[from] PolicyError),

    /// A host service is temporarily unavailable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Platform error
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Result type for SDK operations.
pub type SdkResult<T> = Result<T, SdkError>;

impl SdkError {
    /// Create a storage error.
    #[must_use]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a template error.
    #[must_use]
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }
}

impl Retryable for SdkError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Unavailable(_) => true,
            Self::Policy(e) => e.is_retryable(),
            Self::Platform(e) => e.is_retryable(),
            _ => false,
        }
    }
}
