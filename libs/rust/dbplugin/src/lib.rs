//! Database plugin protocol.
//!
//! Two incompatible RPC generations are supported:
//! - [`v5`]: the engine generates credentials and hands them to the plugin
//! - [`v4`]: the plugin generates its own credentials
//!
//! Plugins run out of process and are reached over gRPC ([`grpc`]) after a
//! stdout handshake performed by the [`runner`]. The [`catalog`] dispenses
//! handles by plugin name and version, and [`middleware`] wraps every call
//! with error sanitizing, metrics and trace logging.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod convert;
pub mod error;
pub mod grpc;
pub mod middleware;
pub mod proto;
pub mod runner;
pub mod v4;
pub mod v5;

pub use catalog::{PluginCatalog, ProcessCatalog};
pub use error::{PluginError, PluginResult};
pub use middleware::{ErrorSanitizer, Middleware, MiddlewareV4, MiddlewareV5, PluginMetrics};
pub use runner::{PluginCommand, PluginRunner};
pub use v4::{DatabaseV4, StatementsV4, StaticUserConfig};
pub use v5::{
    ChangeExpiration, ChangePassword, ChangePublicKey, CredentialType, DatabaseV5, DeleteUserRequest,
    DeleteUserResponse, InitializeRequest, InitializeResponse, NewUserRequest, NewUserResponse, Statements,
    UpdateUserRequest, UpdateUserResponse, UsernameMetadata,
};
