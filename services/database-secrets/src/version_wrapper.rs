//! One interface over both plugin generations.
//!
//! v5 plugins are handed the credential to set; v4 plugins generate their own
//! passwords and split updates across `RenewUser`, `SetCredentials` and
//! `RotateRootCredentials`. Callers only see [`DatabaseVersionWrapper`].

use crate::error::{BackendError, BackendResult};
use dbplugin::{
    CredentialType, DatabaseV4, DatabaseV5, DeleteUserRequest, InitializeRequest, Middleware, MiddlewareV4,
    MiddlewareV5, NewUserRequest, PluginCatalog, PluginError, StatementsV4, StaticUserConfig,
    UpdateUserRequest,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, instrument, warn};

/// The plugin generation behind a wrapper.
#[derive(Debug)]
enum Handle {
    V5(Box<dyn DatabaseV5>),
    V4(Box<dyn DatabaseV4>),
}

/// Result of a user creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedUser {
    /// Database username
    pub username: String,
    /// Password in effect; empty for key-pair credentials
    pub password: String,
}

/// Facade over a v4 or v5 plugin.
#[derive(Debug)]
pub struct DatabaseVersionWrapper {
    handle: Option<Handle>,
    closed: AtomicBool,
}

impl DatabaseVersionWrapper {
    /// Dispense `plugin_name` at `version`, trying v5 first and falling back
    /// to v4 when the plugin only speaks the legacy protocol. Every call is
    /// routed through `middleware`.
    ///
    /// # Errors
    ///
    /// Returns the v5 error unless it was a version mismatch, otherwise an
    /// error carrying both failures.
    #[instrument(skip(catalog, middleware))]
    pub async fn new(
        catalog: &dyn PluginCatalog,
        plugin_name: &str,
        version: &str,
        middleware: Middleware,
    ) -> BackendResult<Self> {
        let v5_err = match catalog.dispense_v5(plugin_name, version).await {
            Ok(db) => {
                debug!(plugin = plugin_name, "dispensed v5 plugin");
                return Ok(Self::from_v5(Box::new(MiddlewareV5::new(db, middleware))));
            }
            Err(e @ PluginError::VersionMismatch(_)) => e,
            Err(e) => return Err(e.into()),
        };
        match catalog.dispense_v4(plugin_name, version).await {
            Ok(db) => {
                debug!(plugin = plugin_name, "dispensed v4 plugin");
                Ok(Self::from_v4(Box::new(MiddlewareV4::new(db, middleware))))
            }
            Err(v4_err) => Err(BackendError::PluginUnavailable(format!(
                "{plugin_name}: v5: {v5_err}; v4: {v4_err}"
            ))),
        }
    }

    /// Wrap a v5 plugin.
    #[must_use]
    pub fn from_v5(db: Box<dyn DatabaseV5>) -> Self {
        Self {
            handle: Some(Handle::V5(db)),
            closed: AtomicBool::new(false),
        }
    }

    /// Wrap a v4 plugin.
    #[must_use]
    pub fn from_v4(db: Box<dyn DatabaseV4>) -> Self {
        Self {
            handle: Some(Handle::V4(db)),
            closed: AtomicBool::new(false),
        }
    }

    /// A wrapper with no plugin; every call fails.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            handle: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether a v5 plugin is wrapped.
    #[must_use]
    pub const fn is_v5(&self) -> bool {
        matches!(self.handle, Some(Handle::V5(_)))
    }

    /// Whether a v4 plugin is wrapped.
    #[must_use]
    pub const fn is_v4(&self) -> bool {
        matches!(self.handle, Some(Handle::V4(_)))
    }

    fn handle(&self) -> BackendResult<&Handle> {
        self.handle.as_ref().ok_or(BackendError::NoDatabase)
    }

    /// Initialize the plugin and return the config to persist.
    ///
    /// # Errors
    ///
    /// Returns the plugin error, e.g. when verification fails.
    pub async fn initialize(&self, req: InitializeRequest) -> BackendResult<Map<String, Value>> {
        match self.handle()? {
            Handle::V5(db) => Ok(db.initialize(req).await?.config),
            Handle::V4(db) => Ok(db.init(req.config, req.verify_connection).await?),
        }
    }

    /// Create a user. v5 plugins receive the password in `req`, which is
    /// echoed back; v4 plugins generate their own.
    ///
    /// # Errors
    ///
    /// Returns the plugin error, or a validation error for key-pair
    /// credentials on a v4 plugin.
    pub async fn new_user(&self, req: NewUserRequest) -> BackendResult<CreatedUser> {
        match self.handle()? {
            Handle::V5(db) => {
                let password = req.password.clone();
                let resp = db.new_user(req).await?;
                Ok(CreatedUser {
                    username: resp.username,
                    password,
                })
            }
            Handle::V4(db) => {
                if req.credential_type != CredentialType::Password {
                    return Err(BackendError::invalid_request(format!(
                        "credential_type {} is not supported by v4 plugins",
                        req.credential_type.as_str()
                    )));
                }
                let statements = StatementsV4 {
                    creation: req.statements.commands,
                    rollback: req.rollback_statements.commands,
                    ..StatementsV4::default()
                };
                let (username, password) = db
                    .create_user(statements, req.username_config, req.expiration)
                    .await?;
                Ok(CreatedUser { username, password })
            }
        }
    }

    /// Change a user's password, public key or expiration. Returns a config
    /// to merge into the stored connection when a v4 root rotation
    /// produced one.
    ///
    /// # Errors
    ///
    /// Fails before any plugin call when both a password and an expiration
    /// are requested. On v4, a non-root password change against a plugin
    /// without `SetCredentials` fails with
    /// [`BackendError::PluginStaticUnsupported`].
    pub async fn update_user(
        &self,
        req: UpdateUserRequest,
        is_root_user: bool,
    ) -> BackendResult<Option<Map<String, Value>>> {
        if req.password.is_some() && req.expiration.is_some() {
            return Err(BackendError::PasswordAndExpiration);
        }
        match self.handle()? {
            Handle::V5(db) => {
                db.update_user(req).await?;
                Ok(None)
            }
            Handle::V4(db) => update_user_v4(db.as_ref(), req, is_root_user).await,
        }
    }

    /// Drop a user.
    ///
    /// # Errors
    ///
    /// Returns the plugin error.
    pub async fn delete_user(&self, req: DeleteUserRequest) -> BackendResult<()> {
        match self.handle()? {
            Handle::V5(db) => {
                db.delete_user(req).await?;
            }
            Handle::V4(db) => {
                let statements = StatementsV4 {
                    revocation: req.statements.commands,
                    ..StatementsV4::default()
                };
                db.revoke_user(statements, &req.username).await?;
            }
        }
        Ok(())
    }

    /// Database type reported by the plugin.
    ///
    /// # Errors
    ///
    /// Returns the plugin error.
    pub async fn type_name(&self) -> BackendResult<String> {
        match self.handle()? {
            Handle::V5(db) => Ok(db.type_name().await?),
            Handle::V4(db) => Ok(db.type_name().await?),
        }
    }

    /// Close the plugin. Closing twice is not an error.
    ///
    /// # Errors
    ///
    /// Fails on an empty wrapper or when the plugin's close fails.
    pub async fn close(&self) -> BackendResult<()> {
        let handle = self.handle()?;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match handle {
            Handle::V5(db) => db.close().await?,
            Handle::V4(db) => db.close().await?,
        }
        Ok(())
    }
}

async fn update_user_v4(
    db: &dyn DatabaseV4,
    req: UpdateUserRequest,
    is_root_user: bool,
) -> BackendResult<Option<Map<String, Value>>> {
    if req.public_key.is_some() {
        return Err(BackendError::invalid_request("v4 plugins do not support public key changes"));
    }
    if let Some(change) = req.expiration {
        let statements = StatementsV4 {
            renewal: change.statements.commands,
            ..StatementsV4::default()
        };
        db.renew_user(statements, &req.username, change.new_expiration).await?;
        return Ok(None);
    }
    let Some(change) = req.password else {
        return Ok(None);
    };

    let statements = StatementsV4 {
        rotation: change.statements.commands.clone(),
        ..StatementsV4::default()
    };
    let static_user = StaticUserConfig {
        username: req.username.clone(),
        password: change.new_password,
        create: false,
    };
    match db.set_credentials(statements, static_user).await {
        Ok(_) => Ok(None),
        Err(e) if e.is_unimplemented() && is_root_user => {
            warn!(username = %req.username, "plugin lacks SetCredentials, rotating root credentials instead");
            let config = db.rotate_root_credentials(change.statements.commands).await?;
            Ok(Some(config))
        }
        Err(e) if e.is_unimplemented() => Err(BackendError::PluginStaticUnsupported),
        Err(e) => Err(e.into()),
    }
}
