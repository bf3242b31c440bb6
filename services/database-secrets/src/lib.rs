//! Database secrets engine.
//!
//! Issues short-lived database users on demand, keeps the passwords of
//! long-lived accounts rotated on a schedule, and rotates the root account
//! each connection uses. All database work goes through out-of-process
//! plugins from the [`dbplugin`] crate; the host supplies storage, the
//! plugin catalog and password policies through [`vault_sdk`].
//!
//! [`DatabaseBackend`] is the entry point: build it with
//! [`DatabaseBackend::new`], start the background loops with
//! [`DatabaseBackend::initialize`], then route requests through
//! [`DatabaseBackend::handle_request`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod ca;
pub mod config;
pub mod connection_cache;
pub mod credentials;
pub mod dynamic;
pub mod error;
pub mod events;
pub mod metrics;
pub mod model;
mod paths;
pub mod queue;
pub mod root_rotation;
pub mod rotation;
pub mod shutdown;
pub mod store;
pub mod version_wrapper;

// Re-exports for convenience
pub use backend::DatabaseBackend;
pub use config::EngineConfig;
pub use error::{BackendError, BackendResult};
pub use model::{ConnectionConfig, Role, StaticRole};
