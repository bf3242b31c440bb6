//! Root credential rotation and the rollback of interrupted rotations.
//!
//! A rotation records a [`RootWal`] holding both the old and the new
//! password before the plugin changes the root account. The entry is
//! removed once the connection config holds the new password. Leftover
//! entries are resolved by probing the database: whichever password still
//! logs in is the one storage must hold.

use crate::backend::DatabaseBackend;
use crate::error::{BackendError, BackendResult};
use crate::events;
use crate::model::ConnectionConfig;
use dbplugin::{ChangePassword, CredentialType, Statements, UpdateUserRequest};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use vault_sdk::wal::{delete_wal, get_wal, list_wal, put_wal};
use vault_sdk::Operation;

/// WAL kind of an in-flight root rotation.
pub const ROOT_WAL_KIND: &str = "rotateRootWAL";

/// Intent recorded before a connection's root password is changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootWal {
    /// Connection being rotated
    pub connection_name: String,
    /// Root account
    pub username: String,
    /// Password stored before the rotation
    pub old_password: String,
    /// Password being set
    pub new_password: String,
}

fn connection_lock_key(name: &str) -> String {
    format!("connection:{name}")
}

impl DatabaseBackend {
    /// Replace the root password of connection `name` on the database and
    /// in storage, then restart its plugin with the new password.
    ///
    /// # Errors
    ///
    /// Fails if the connection is unknown, has no root username, or any
    /// step fails. A WAL written before the failure is left for rollback.
    #[instrument(skip(self))]
    pub async fn rotate_root_credentials(&self, name: &str, operation: Operation) -> BackendResult<()> {
        let _guard = self.role_locks.lock(&connection_lock_key(name)).await;
        match self.rotate_root_locked(name).await {
            Ok(()) => {
                info!(connection = name, "rotated root credentials");
                self.events.emit(events::ROTATE_ROOT_SUCCESS, operation, Some(name), &[]);
                Ok(())
            }
            Err(e) => {
                error!(connection = name, error = %e, "root credential rotation failed");
                self.events.emit(events::ROTATE_ROOT_FAIL, operation, Some(name), &[]);
                Err(e)
            }
        }
    }

    async fn rotate_root_locked(&self, name: &str) -> BackendResult<()> {
        let mut config = self.store.connection(name).await?.ok_or_else(|| {
            BackendError::invalid_request(format!("failed to find entry for connection with name: {name:?}"))
        })?;
        let username = config
            .root_username()
            .ok_or_else(|| BackendError::invalid_request("unable to rotate root credentials: no username in configuration"))?
            .to_string();
        let old_password = config.root_password().unwrap_or_default().to_string();

        let instance = self.get_connection(name).await?;
        let new_password = self
            .credentials
            .password(self.system.as_ref(), &config.password_policy)
            .await?;
        let new_password = new_password.expose_secret().to_string();

        let wal = RootWal {
            connection_name: name.to_string(),
            username: username.clone(),
            old_password,
            new_password: new_password.clone(),
        };
        let storage = self.store.storage();
        let wal_id = put_wal(storage, ROOT_WAL_KIND, &wal, self.clock.now()).await?;

        let request = UpdateUserRequest {
            username,
            credential_type: CredentialType::Password,
            password: Some(ChangePassword {
                new_password: new_password.clone(),
                statements: Statements::new(config.root_rotation_statements.clone()),
            }),
            ..UpdateUserRequest::default()
        };
        match instance.wrapper().update_user(request, true).await? {
            Some(details) => config.connection_details.extend(details),
            None => {
                config
                    .connection_details
                    .insert("password".into(), Value::String(new_password));
            }
        }

        self.store.put_connection(&config).await?;
        self.connections.reset(name).await?;
        if let Err(e) = delete_wal(storage, &wal_id).await {
            warn!(connection = name, wal_id = %wal_id, error = %e, "failed to delete root rotation WAL");
        }
        Ok(())
    }

    /// Requeue static roles left with a pending WAL, then resolve root
    /// rotation WALs older than the configured minimum age. Called by the
    /// rollback loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL list cannot be read.
    pub async fn rollback(&self) -> BackendResult<()> {
        if let Err(e) = self.requeue_pending_static_wals().await {
            warn!(error = %e, "static WAL reconciliation failed");
        }
        self.rollback_root_wals(self.config.wal_rollback_min_age).await
    }

    /// Resolve every root rotation WAL at least `min_age` old.
    pub(crate) async fn rollback_root_wals(&self, min_age: Duration) -> BackendResult<()> {
        let storage = self.store.storage();
        let now = self.clock.now();
        let min_age = chrono::Duration::from_std(min_age).unwrap_or(chrono::Duration::MAX);

        for id in list_wal(storage).await? {
            let Some(entry) = get_wal(storage, &id).await? else {
                continue;
            };
            if entry.kind != ROOT_WAL_KIND {
                continue;
            }
            if now - entry.created_at < min_age {
                debug!(wal_id = %id, "root rotation WAL too recent to roll back");
                continue;
            }
            let wal: RootWal = match entry.decode() {
                Ok(wal) => wal,
                Err(e) => {
                    warn!(wal_id = %id, error = %e, "deleting malformed root rotation WAL");
                    delete_wal(storage, &id).await?;
                    continue;
                }
            };
            if let Err(e) = self.rollback_root_wal(&id, &wal).await {
                warn!(wal_id = %id, connection = %wal.connection_name, error = %e, "root rotation rollback failed");
            }
        }
        Ok(())
    }

    #[instrument(skip(self, wal), fields(connection = %wal.connection_name))]
    async fn rollback_root_wal(&self, id: &str, wal: &RootWal) -> BackendResult<()> {
        let _guard = self.role_locks.lock(&connection_lock_key(&wal.connection_name)).await;
        let storage = self.store.storage();
        let Some(mut config) = self.store.connection(&wal.connection_name).await? else {
            debug!("connection deleted, dropping root rotation WAL");
            delete_wal(storage, id).await?;
            return Ok(());
        };

        if self.probe_root(&config, &wal.old_password).await {
            info!("database still accepts the old root password, discarding WAL");
            delete_wal(storage, id).await?;
            return Ok(());
        }
        if self.probe_root(&config, &wal.new_password).await {
            info!("database accepts the new root password, updating stored config");
            config
                .connection_details
                .insert("password".into(), Value::String(wal.new_password.clone()));
            self.store.put_connection(&config).await?;
            self.connections.reset(&wal.connection_name).await?;
            delete_wal(storage, id).await?;
            return Ok(());
        }

        warn!("neither the old nor the new root password works, leaving WAL for manual intervention");
        Ok(())
    }

    /// Whether the plugin initializes and verifies with `password` as root.
    async fn probe_root(&self, config: &ConnectionConfig, password: &str) -> bool {
        let mut probe = config.clone();
        probe
            .connection_details
            .insert("password".into(), Value::String(password.to_string()));
        match self.build_instance(&probe, true).await {
            Ok((instance, _)) => {
                instance.close().await;
                true
            }
            Err(e) => {
                debug!(error = %e, "root password probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_wal_shape() {
        let wal = RootWal {
            connection_name: "pg".into(),
            username: "vaultadmin".into(),
            old_password: "old".into(),
            new_password: "new".into(),
        };
        let value = serde_json::to_value(&wal).unwrap();
        assert_eq!(value["connection_name"], "pg");
        assert_eq!(serde_json::from_value::<RootWal>(value).unwrap(), wal);
        assert_eq!(connection_lock_key("pg"), "connection:pg");
    }
}
