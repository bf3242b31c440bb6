//! Engine error types using thiserror 2.0.

use credential_random::PolicyError;
use dbplugin::PluginError;
use rust_common::{PlatformError, Retryable};
use thiserror::Error;
use vault_sdk::SdkError;

/// Errors returned by the database secrets engine.
#[derive(Error, Debug)]
pub enum BackendError {
    /// A request failed validation
    #[error("{0}")]
    InvalidRequest(String),

    /// The role is not allowed on its connection
    #[error("permission denied")]
    PermissionDenied,

    /// A static role update tried to change the account name
    #[error("cannot update static account username")]
    UsernameChange,

    /// The plugin cannot set passwords of existing accounts
    #[error("plugin does not support static role credential rotation")]
    PluginStaticUnsupported,

    /// An update asked for a password and an expiration change at once
    #[error("cannot specify both password and expiration change")]
    PasswordAndExpiration,

    /// A version wrapper was used without a plugin
    #[error("no underlying database specified")]
    NoDatabase,

    /// Neither plugin generation could be started
    #[error("unable to create database instance: {0}")]
    PluginUnavailable(String),

    /// The connection cache has been shut down
    #[error("connection cache is closed")]
    CacheClosed,

    /// Rotation-manager registration and storage disagree
    #[error("{0}")]
    RotationSkew(String),

    /// Plugin call failed
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Host interface failed
    #[error(transparent)]
    Sdk(#[from] SdkError),

    /// Password generation failed
    #[error("unable to generate password: {0}")]
    Policy(#[from] PolicyError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected failure
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result type for engine operations.
pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    /// Create a validation error.
    #[must_use]
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error is the caller's fault and should be rendered as an
    /// error response rather than a failure.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::UsernameChange
                | Self::PasswordAndExpiration
                | Self::Sdk(SdkError::InvalidRequest(_) | SdkError::Template(_))
        )
    }
}

impl From<PlatformError> for BackendError {
    fn from(err: PlatformError) -> Self {
        Self::Sdk(SdkError::Platform(err))
    }
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest(_)
            | Self::PermissionDenied
            | Self::UsernameChange
            | Self::PluginStaticUnsupported
            | Self::PasswordAndExpiration
            | Self::NoDatabase
            | Self::PluginUnavailable(_)
            | Self::Config(_) => false,
            Self::Plugin(e) => !matches!(
                e,
                PluginError::NotFound(_)
                    | PluginError::ChecksumMismatch(_)
                    | PluginError::VersionMismatch(_)
                    | PluginError::InvalidRequest(_)
                    | PluginError::UrlParse
            ),
            Self::Sdk(e) => !matches!(
                e,
                SdkError::InvalidRequest(_) | SdkError::Template(_) | SdkError::PermissionDenied
            ),
            Self::Policy(e) => e.is_retryable(),
            Self::CacheClosed
            | Self::RotationSkew(_)
            | Self::Serialization(_)
            | Self::Internal(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            BackendError::PasswordAndExpiration.to_string(),
            "cannot specify both password and expiration change"
        );
        assert_eq!(BackendError::NoDatabase.to_string(), "no underlying database specified");
        assert_eq!(
            BackendError::from(PluginError::UrlParse).to_string(),
            "unable to parse connection url"
        );
    }

    #[test]
    fn test_fatal_rotation_errors_are_not_retryable() {
        assert!(!BackendError::PluginStaticUnsupported.is_retryable());
        assert!(!BackendError::UsernameChange.is_retryable());
        assert!(!BackendError::from(PluginError::NotFound("pg".to_string())).is_retryable());
    }

    #[test]
    fn test_driver_failures_are_retryable() {
        assert!(BackendError::from(PluginError::database("connection refused")).is_retryable());
        assert!(BackendError::from(PluginError::Closed).is_retryable());
        assert!(BackendError::from(SdkError::storage("disk full")).is_retryable());
    }

    #[test]
    fn test_user_errors() {
        assert!(BackendError::invalid_request("missing db_name").is_user_error());
        assert!(BackendError::from(SdkError::invalid_request("bad ttl")).is_user_error());
        assert!(!BackendError::PermissionDenied.is_user_error());
    }
}
