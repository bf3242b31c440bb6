//! Database plugin protocol, legacy generation.
//!
//! v4 plugins generate credentials themselves and expose separate methods
//! for renewal, static credentials and root rotation.

use crate::error::PluginResult;
use crate::v5::UsernameMetadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Statement lists of a v4 role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementsV4 {
    /// User creation
    pub creation: Vec<String>,
    /// User revocation
    pub revocation: Vec<String>,
    /// Rollback of a partial creation
    pub rollback: Vec<String>,
    /// Lease renewal
    pub renewal: Vec<String>,
    /// Static credential rotation
    pub rotation: Vec<String>,
}

/// Credentials to set on an existing user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticUserConfig {
    /// Existing username
    pub username: String,
    /// Password to set
    pub password: String,
    /// Whether to create the user if missing
    pub create: bool,
}

/// A v4 database plugin.
#[async_trait]
pub trait DatabaseV4: Send + Sync + std::fmt::Debug {
    /// Plugin type name.
    async fn type_name(&self) -> PluginResult<String>;

    /// Create a user; the plugin picks both username and password.
    async fn create_user(
        &self,
        statements: StatementsV4,
        username_config: UsernameMetadata,
        expiration: DateTime<Utc>,
    ) -> PluginResult<(String, String)>;

    /// Extend a user's expiry.
    async fn renew_user(
        &self,
        statements: StatementsV4,
        username: &str,
        expiration: DateTime<Utc>,
    ) -> PluginResult<()>;

    /// Remove a user.
    async fn revoke_user(&self, statements: StatementsV4, username: &str) -> PluginResult<()>;

    /// Rotate the plugin's own credentials; returns the updated config.
    async fn rotate_root_credentials(&self, statements: Vec<String>) -> PluginResult<Map<String, Value>>;

    /// Configure the plugin; returns the possibly modified config.
    async fn init(&self, config: Map<String, Value>, verify_connection: bool) -> PluginResult<Map<String, Value>>;

    /// Set the password of an existing user.
    async fn set_credentials(
        &self,
        statements: StatementsV4,
        static_user: StaticUserConfig,
    ) -> PluginResult<(String, String)>;

    /// Generate a password using the plugin's own rules.
    async fn generate_credentials(&self) -> PluginResult<String>;

    /// Release connections and stop the plugin.
    async fn close(&self) -> PluginResult<()>;
}
