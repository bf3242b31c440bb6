//! Centralized error types shared by the engine's libraries.
//!
//! Every error is classified as either retryable or permanent so that
//! schedulers (the static-role rotation queue, the plugin runner's connect
//! loop) can decide whether to try again.

use thiserror::Error;

/// Classification shared by every error type that flows through a retry loop.
pub trait Retryable {
    /// Whether repeating the failed operation may succeed.
    fn is_retryable(&self) -> bool;
}

/// Failure shared by the engine's libraries below the request layer.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// JSON payload could not be encoded or decoded.
    #[error("malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A plugin process, storage backend or policy source is not reachable yet.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The named resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Caller-supplied value was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A deadline elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Bug or broken invariant.
    #[error("internal: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Create an unavailable error with the given message.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an invalid input error with the given message.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a timeout error with the given message.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

impl Retryable for PlatformError {
    /// Only reachability failures and elapsed deadlines are worth repeating.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_common::{PlatformError, Retryable};
    ///
    /// assert!(PlatformError::unavailable("dial tcp: connection refused").is_retryable());
    /// assert!(!PlatformError::NotFound("plugin".to_string()).is_retryable());
    /// ```
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}
