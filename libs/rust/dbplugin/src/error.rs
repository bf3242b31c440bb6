//! Plugin error types using thiserror 2.0.
//!
//! gRPC status codes from plugin processes are mapped into [`PluginError`] so
//! callers can distinguish an unimplemented method (which drives the v4
//! fallbacks) from driver failures and transport failures.

use rust_common::Retryable;
use thiserror::Error;

/// Errors returned by database plugins and their transport.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The plugin does not implement the method
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The plugin speaks a different protocol generation
    #[error("incompatible plugin API version: {0}")]
    VersionMismatch(String),

    /// The connection URL could not be parsed
    #[error("unable to parse connection url")]
    UrlParse,

    /// The plugin has been closed
    #[error("plugin is closed")]
    Closed,

    /// No such plugin in the catalog
    #[error("no plugin found for {0}")]
    NotFound(String),

    /// Plugin binary does not match its registered checksum
    #[error("checksums did not match for plugin {0}")]
    ChecksumMismatch(String),

    /// The plugin process could not be started or did not hand shake
    #[error("failed to start plugin: {0}")]
    Spawn(String),

    /// The RPC channel failed
    #[error("plugin transport error: {0}")]
    Transport(String),

    /// The request was rejected by the plugin
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An error reported by the database driver
    #[error("{0}")]
    Database(String),

    /// Unexpected failure
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Create a database driver error.
    #[must_use]
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether the error means "method not implemented".
    #[must_use]
    pub const fn is_unimplemented(&self) -> bool {
        matches!(self, Self::Unimplemented(_))
    }

    /// Rewrite the human-readable part of the error, keeping its kind.
    #[must_use]
    pub fn map_message(self, f: impl Fn(&str) -> String) -> Self {
        match self {
            Self::Unimplemented(m) => Self::Unimplemented(f(&m)),
            Self::VersionMismatch(m) => Self::VersionMismatch(f(&m)),
            Self::NotFound(m) => Self::NotFound(f(&m)),
            Self::Spawn(m) => Self::Spawn(f(&m)),
            Self::Transport(m) => Self::Transport(f(&m)),
            Self::InvalidRequest(m) => Self::InvalidRequest(f(&m)),
            Self::Database(m) => Self::Database(f(&m)),
            Self::Internal(e) => Self::Database(f(&format!("{e:#}"))),
            other @ (Self::UrlParse | Self::Closed | Self::ChecksumMismatch(_)) => other,
        }
    }
}

impl Retryable for PluginError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<tonic::Status> for PluginError {
    fn from(status: tonic::Status) -> Self {
        let msg = status.message().to_string();
        match status.code() {
            tonic::Code::Unimplemented => Self::Unimplemented(msg),
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Cancelled => {
                Self::Transport(msg)
            }
            tonic::Code::InvalidArgument => Self::InvalidRequest(msg),
            _ => Self::Database(msg),
        }
    }
}

impl From<tonic::transport::Error> for PluginError {
    fn from(err: tonic::transport::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err: PluginError = tonic::Status::unimplemented("SetCredentials").into();
        assert!(err.is_unimplemented());

        let err: PluginError = tonic::Status::unavailable("connection refused").into();
        assert!(err.is_retryable());

        let err: PluginError = tonic::Status::unknown("pq: password authentication failed").into();
        assert_eq!(err.to_string(), "pq: password authentication failed");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_map_message_keeps_kind() {
        let err = PluginError::Unimplemented("x secret".to_string()).map_message(|m| m.replace("secret", "***"));
        assert!(matches!(err, PluginError::Unimplemented(ref m) if m == "x ***"));

        let err = PluginError::Closed.map_message(|_| "changed".to_string());
        assert!(matches!(err, PluginError::Closed));
    }
}
