//! Dynamic credentials: issuance and the lease renew/revoke callbacks.

use crate::backend::DatabaseBackend;
use crate::credentials::CredentialConfig;
use crate::error::{BackendError, BackendResult};
use crate::events;
use chrono::{DateTime, Utc};
use dbplugin::{
    ChangeExpiration, CredentialType, DeleteUserRequest, NewUserRequest, Statements, UpdateUserRequest,
    UsernameMetadata,
};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use vault_sdk::{Request, Response, Secret, SdkError};

/// Lease internal-data keys.
const LEASE_USERNAME: &str = "username";
const LEASE_ROLE: &str = "role";
const LEASE_DB_NAME: &str = "db_name";

fn to_chrono(duration: Duration) -> BackendResult<chrono::Duration> {
    chrono::Duration::from_std(duration).map_err(|e| BackendError::invalid_request(format!("invalid ttl: {e}")))
}

/// Expiration of a lease renewed at `now`: one default TTL out, capped at
/// the lease's max TTL from issue.
pub(crate) fn renewed_expiration(
    now: DateTime<Utc>,
    issue_time: DateTime<Utc>,
    ttl: Duration,
    max_ttl: Duration,
) -> BackendResult<DateTime<Utc>> {
    let wanted = now + to_chrono(ttl)?;
    let cap = issue_time + to_chrono(max_ttl)?;
    Ok(wanted.min(cap))
}

impl DatabaseBackend {
    /// Create a database user for `role_name` and lease it to the caller.
    #[instrument(skip(self, req))]
    pub(crate) async fn issue_credentials(&self, req: &Request, role_name: &str) -> BackendResult<Response> {
        let role = self
            .store
            .role(role_name)
            .await?
            .ok_or_else(|| BackendError::invalid_request(format!("unknown role: {role_name}")))?;
        let connection = self.store.connection(&role.db_name).await?.ok_or_else(|| {
            BackendError::invalid_request(format!("could not find connection with name {:?}", role.db_name))
        })?;
        if !connection.is_role_allowed(role_name) {
            return Err(BackendError::PermissionDenied);
        }

        let result = self.create_user(req, &role, &connection.password_policy).await;
        match result {
            Ok(response) => {
                self.metrics
                    .credentials_issued
                    .with_label_values(&[role.credential_type.as_str()])
                    .inc();
                self.events.emit(
                    events::CREDS_CREATE_SUCCESS,
                    req.operation,
                    Some(&role.db_name),
                    &[("name", role_name)],
                );
                Ok(response)
            }
            Err(e) => {
                // The engine never learns a username from a failed NewUser, so
                // rollback statements only run if the plugin applies them itself.
                debug!(
                    role = %role_name,
                    rollback_statements = role.rollback_statements.len(),
                    error = %e,
                    "credential creation failed, engine-side rollback skipped"
                );
                self.events.emit(
                    events::CREDS_CREATE_FAIL,
                    req.operation,
                    Some(&role.db_name),
                    &[("name", role_name)],
                );
                Err(e)
            }
        }
    }

    async fn create_user(
        &self,
        req: &Request,
        role: &crate::model::Role,
        connection_policy: &str,
    ) -> BackendResult<Response> {
        let instance = self.get_connection(&role.db_name).await?;
        let config = CredentialConfig::parse(role.credential_type, &role.credential_config)?;
        let credential = self
            .credentials
            .generate(self.system.as_ref(), &config, connection_policy)
            .await?;

        let now = self.clock.now();
        let ttl = role.default_ttl_or(self.config.default_lease_ttl);
        let max_ttl = role.max_ttl_or(self.config.max_lease_ttl);
        let request = NewUserRequest {
            username_config: UsernameMetadata {
                display_name: req.display_name.clone(),
                role_name: role.name.clone(),
            },
            statements: Statements::new(role.creation_statements.clone()),
            rollback_statements: Statements::new(role.rollback_statements.clone()),
            credential_type: role.credential_type,
            password: credential.password().unwrap_or_default().to_string(),
            public_key: credential.public_key().unwrap_or_default(),
            expiration: now + to_chrono(ttl)?,
        };
        let created = instance.wrapper().new_user(request).await?;
        info!(role = %role.name, username = %created.username, "issued dynamic credentials");

        let mut data = Map::new();
        data.insert("username".into(), json!(created.username));
        match role.credential_type {
            CredentialType::Password => {
                data.insert("password".into(), json!(created.password));
            }
            CredentialType::RsaPrivateKey => {
                data.insert("rsa_private_key".into(), json!(credential.private_key().unwrap_or_default()));
            }
        }

        let mut internal = Map::new();
        internal.insert(LEASE_USERNAME.into(), Value::String(created.username));
        internal.insert(LEASE_ROLE.into(), Value::String(role.name.clone()));
        internal.insert(LEASE_DB_NAME.into(), Value::String(role.db_name.clone()));

        let mut response = Response::with_data(data);
        response.secret = Some(Secret::new(internal, now).with_ttls(ttl, max_ttl));
        Ok(response)
    }

    /// Extend a dynamic lease. Plugins that cannot change expirations leave
    /// the database user as is; the lease is extended regardless.
    ///
    /// # Errors
    ///
    /// Fails if the lease or its role is unknown or the plugin errors.
    #[instrument(skip(self, req))]
    pub async fn renew_lease(&self, req: &Request) -> BackendResult<Response> {
        let secret = req
            .secret
            .as_ref()
            .ok_or_else(|| BackendError::invalid_request("secret is missing"))?;
        let username = lease_field(secret, LEASE_USERNAME)?;
        let role_name = lease_field(secret, LEASE_ROLE)?;
        let role = self
            .store
            .role(role_name)
            .await?
            .ok_or_else(|| BackendError::invalid_request(format!("could not find role with name: {role_name}")))?;
        let db_name = secret.internal_str(LEASE_DB_NAME).unwrap_or(&role.db_name).to_string();

        let now = self.clock.now();
        let ttl = role.default_ttl_or(self.config.default_lease_ttl);
        let max_ttl = role.max_ttl_or(self.config.max_lease_ttl);
        let expiration = renewed_expiration(now, secret.issue_time, ttl, max_ttl)?;

        let instance = self.get_connection(&db_name).await?;
        let request = UpdateUserRequest {
            username: username.to_string(),
            credential_type: role.credential_type,
            expiration: Some(ChangeExpiration {
                new_expiration: expiration,
                statements: Statements::new(role.renew_statements.clone()),
            }),
            ..UpdateUserRequest::default()
        };
        match instance.wrapper().update_user(request, false).await {
            Ok(_) => {}
            Err(BackendError::Plugin(e)) if e.is_unimplemented() => {
                warn!(username, "plugin cannot renew users, extending the lease only");
            }
            Err(e) => return Err(e),
        }

        self.events
            .emit(events::CREDS_RENEW, req.operation, Some(&db_name), &[("name", role_name)]);

        let mut renewed = secret.clone();
        renewed.ttl = (expiration - now).to_std().unwrap_or(Duration::ZERO);
        renewed.max_ttl = max_ttl;
        Ok(Response {
            secret: Some(renewed),
            ..Response::default()
        })
    }

    /// Drop the database user of a dynamic lease. Works after the role is
    /// deleted; the connection comes from the lease.
    ///
    /// # Errors
    ///
    /// Fails if the lease data is incomplete or the plugin errors, so the
    /// host can retry.
    #[instrument(skip(self, req))]
    pub async fn revoke_lease(&self, req: &Request) -> BackendResult<()> {
        let secret = req
            .secret
            .as_ref()
            .ok_or_else(|| BackendError::invalid_request("secret is missing"))?;
        let username = lease_field(secret, LEASE_USERNAME)?;
        let role_name = secret.internal_str(LEASE_ROLE).unwrap_or_default();
        let role = if role_name.is_empty() {
            None
        } else {
            self.store.role(role_name).await?
        };
        let db_name = match (secret.internal_str(LEASE_DB_NAME), &role) {
            (Some(db_name), _) => db_name.to_string(),
            (None, Some(role)) => role.db_name.clone(),
            (None, None) => {
                return Err(SdkError::invalid_request(format!(
                    "could not find connection for lease of role {role_name:?}"
                ))
                .into())
            }
        };
        let statements = role.map(|r| r.revocation_statements).unwrap_or_default();

        let instance = self.get_connection(&db_name).await?;
        instance
            .wrapper()
            .delete_user(DeleteUserRequest {
                username: username.to_string(),
                statements: Statements::new(statements),
            })
            .await?;
        info!(username, connection = %db_name, "revoked dynamic credentials");
        self.events
            .emit(events::CREDS_REVOKE, req.operation, Some(&db_name), &[("name", role_name)]);
        Ok(())
    }
}

fn lease_field<'a>(secret: &'a Secret, key: &str) -> BackendResult<&'a str> {
    secret
        .internal_str(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BackendError::invalid_request(format!("lease is missing {key}")))
}
