//! Database plugin protocol, current generation.
//!
//! v5 plugins are told the password to use: the caller generates
//! credentials and the plugin only chooses the username.

use crate::error::PluginResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of credential a user authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// Password authentication
    #[default]
    Password,
    /// RSA key-pair authentication
    RsaPrivateKey,
}

impl CredentialType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::RsaPrivateKey => "rsa_private_key",
        }
    }

    /// Numeric protobuf value.
    #[must_use]
    pub const fn to_proto(self) -> i32 {
        match self {
            Self::Password => 0,
            Self::RsaPrivateKey => 1,
        }
    }

    /// Parse the numeric protobuf value; unknown values default to password.
    #[must_use]
    pub const fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::RsaPrivateKey,
            _ => Self::Password,
        }
    }
}

impl std::str::FromStr for CredentialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(Self::Password),
            "rsa_private_key" => Ok(Self::RsaPrivateKey),
            other => Err(format!("invalid credential_type {other:?}")),
        }
    }
}

/// Commands handed to the plugin; their meaning is plugin-specific.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statements {
    /// Statement list
    pub commands: Vec<String>,
}

impl Statements {
    /// Wrap a statement list.
    #[must_use]
    pub const fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }
}

/// Input record for username templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsernameMetadata {
    /// Display name of the requesting token
    pub display_name: String,
    /// Role the credentials are issued for
    pub role_name: String,
}

/// `Initialize` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitializeRequest {
    /// Connection details
    pub config: Map<String, Value>,
    /// Whether to verify the connection before returning
    pub verify_connection: bool,
}

/// `Initialize` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitializeResponse {
    /// Possibly modified connection details to persist
    pub config: Map<String, Value>,
}

/// `NewUser` request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUserRequest {
    /// Username template input
    pub username_config: UsernameMetadata,
    /// Creation statements
    pub statements: Statements,
    /// Statements undoing a partial creation
    pub rollback_statements: Statements,
    /// Credential type
    pub credential_type: CredentialType,
    /// Password to assign, for password credentials
    pub password: String,
    /// PEM public key, for key-pair credentials
    pub public_key: Vec<u8>,
    /// When the user should expire
    pub expiration: DateTime<Utc>,
}

/// `NewUser` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUserResponse {
    /// The created username
    pub username: String,
}

/// Password change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePassword {
    /// The password to set
    pub new_password: String,
    /// Rotation statements
    pub statements: Statements,
}

/// Public key change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePublicKey {
    /// PEM public key to set
    pub new_public_key: Vec<u8>,
    /// Rotation statements
    pub statements: Statements,
}

/// Expiration change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeExpiration {
    /// New expiry
    pub new_expiration: DateTime<Utc>,
    /// Renew statements
    pub statements: Statements,
}

/// `UpdateUser` request. At most one kind of change is honored per call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateUserRequest {
    /// User to change
    pub username: String,
    /// Credential type
    pub credential_type: CredentialType,
    /// Password change
    pub password: Option<ChangePassword>,
    /// Public key change
    pub public_key: Option<ChangePublicKey>,
    /// Expiration change
    pub expiration: Option<ChangeExpiration>,
}

/// `UpdateUser` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateUserResponse {}

/// `DeleteUser` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteUserRequest {
    /// User to remove
    pub username: String,
    /// Revocation statements
    pub statements: Statements,
}

/// `DeleteUser` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteUserResponse {}

/// A v5 database plugin.
#[async_trait]
pub trait DatabaseV5: Send + Sync + std::fmt::Debug {
    /// Configure the plugin with connection details.
    async fn initialize(&self, req: InitializeRequest) -> PluginResult<InitializeResponse>;

    /// Create a user with the caller-supplied credential.
    async fn new_user(&self, req: NewUserRequest) -> PluginResult<NewUserResponse>;

    /// Change a user's password, public key or expiration.
    async fn update_user(&self, req: UpdateUserRequest) -> PluginResult<UpdateUserResponse>;

    /// Remove a user.
    async fn delete_user(&self, req: DeleteUserRequest) -> PluginResult<DeleteUserResponse>;

    /// Plugin type name.
    async fn type_name(&self) -> PluginResult<String>;

    /// Release connections and stop the plugin.
    async fn close(&self) -> PluginResult<()>;
}
