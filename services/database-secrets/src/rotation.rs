//! Static-role rotation: the queue, the rotation procedure and WAL replay.
//!
//! Every static role sits in the [`PriorityQueue`] keyed by role name with
//! its next rotation time as priority. A single worker drains due items on
//! each tick; callers of `rotate-role/<name>` run the same procedure. Both
//! take the role's stripe of [`RoleLocks`] first.
//!
//! A rotation writes a [`StaticWal`] carrying the new credential before the
//! plugin is asked to set it. The WAL is deleted once the role entry holds
//! the new credential, so a crash in between is resolved at the next start:
//! the WAL is replayed unless the role was rotated past it.

use crate::backend::DatabaseBackend;
use crate::credentials::{CredentialConfig, GeneratedCredential};
use crate::error::{BackendError, BackendResult};
use crate::events;
use crate::model::StaticRole;
use crate::queue::Item;
use chrono::{DateTime, Utc};
use dbplugin::{ChangePassword, ChangePublicKey, CredentialType, Statements, UpdateUserRequest};
use rust_common::Retryable;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};
use vault_sdk::wal::{delete_wal, get_wal, list_wal, put_wal};
use vault_sdk::Operation;

/// Queue priority of a rotation due at `at`. Rounded up to the next whole
/// second: the worker pops with the current second truncated, so a
/// truncated priority could fire up to a second early.
pub(crate) fn due_priority(at: DateTime<Utc>) -> i64 {
    at.timestamp() + i64::from(at.timestamp_subsec_nanos() > 0)
}

/// WAL kind of an in-flight static rotation.
pub const STATIC_WAL_KIND: &str = "staticRotationWAL";

/// Intent recorded before a static account's credential is changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticWal {
    /// Role being rotated
    pub role_name: String,
    /// Database account
    pub username: String,
    /// Password being set, for password roles
    #[serde(default)]
    pub new_password: String,
    /// Private key PEM being set, for key-pair roles
    #[serde(default)]
    pub new_private_key: String,
    /// Matching public key PEM
    #[serde(default)]
    pub new_public_key: String,
    /// The role's last rotation when the WAL was written
    #[serde(default)]
    pub last_vault_rotation_was: Option<DateTime<Utc>>,
}

impl StaticWal {
    fn credential(&self) -> Option<GeneratedCredential> {
        if !self.new_password.is_empty() {
            return Some(GeneratedCredential::Password(self.new_password.clone().into()));
        }
        if !self.new_private_key.is_empty() && !self.new_public_key.is_empty() {
            return Some(GeneratedCredential::KeyPair {
                public_pem: self.new_public_key.clone(),
                private_pem: self.new_private_key.clone().into(),
            });
        }
        None
    }
}

/// Queue payload: the role snapshot plus a WAL to replay, if any.
#[derive(Debug, Clone)]
pub struct QueuedRole {
    /// Role as last seen
    pub role: Arc<StaticRole>,
    /// WAL whose credential the next rotation must reuse
    pub wal_id: Option<String>,
}

impl QueuedRole {
    fn item(role: StaticRole, wal_id: Option<String>, priority: i64) -> Item<Self> {
        let key = role.name.clone();
        Item::new(
            key,
            priority,
            Self {
                role: Arc::new(role),
                wal_id,
            },
        )
    }
}

/// Striped locks serializing work on a role or connection.
#[derive(Debug)]
pub struct RoleLocks {
    stripes: Vec<Mutex<()>>,
}

impl RoleLocks {
    /// `count` stripes, at least one.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Lock the stripe owning `key`.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let len = self.stripes.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let idx = (hasher.finish() % len) as usize;
        self.stripes[idx].lock().await
    }
}

/// A failed rotation and the WAL a retry must reuse.
#[derive(Debug)]
pub(crate) struct RotationFailure {
    pub(crate) error: BackendError,
    pub(crate) wal_id: Option<String>,
}

impl RotationFailure {
    fn new(error: impl Into<BackendError>, wal_id: Option<String>) -> Self {
        Self {
            error: error.into(),
            wal_id,
        }
    }
}

impl DatabaseBackend {
    /// Rebuild the queue from storage. Static WALs are reconciled first:
    /// those for missing roles or roles rotated since are deleted, the
    /// newest remaining WAL per role is replayed on the next tick.
    pub(crate) async fn populate_queue(&self) -> BackendResult<usize> {
        let now = self.clock.now();
        let mut wals = self.load_static_wals().await?;

        for name in self.store.list_static_roles().await? {
            let mut role = match self.store.static_role(&name).await {
                Ok(Some(role)) => role,
                Ok(None) => continue,
                Err(e) => {
                    warn!(role = %name, error = %e, "skipping unreadable static role");
                    continue;
                }
            };
            let item = match wals.remove(&name) {
                Some(wal_id) => {
                    info!(role = %name, wal_id = %wal_id, "replaying static rotation WAL");
                    QueuedRole::item(role, Some(wal_id), now.timestamp())
                }
                None => {
                    let next = match role.next_vault_rotation {
                        Some(next) => next,
                        None => match role.schedule_next(now) {
                            Ok(next) => next,
                            Err(e) => {
                                warn!(role = %name, error = %e, "skipping static role with invalid cadence");
                                continue;
                            }
                        },
                    };
                    QueuedRole::item(role, None, due_priority(next))
                }
            };
            if let Err(e) = self.queue.upsert(item) {
                warn!(role = %name, error = %e, "failed to queue static role");
            }
        }
        debug!(queued = self.queue.len(), "static rotation queue populated");
        Ok(self.queue.len())
    }

    /// Static WALs worth replaying, newest per role, keyed by role name.
    async fn load_static_wals(&self) -> BackendResult<HashMap<String, String>> {
        let storage = self.store.storage();
        let mut newest: HashMap<String, (String, DateTime<Utc>)> = HashMap::new();

        for id in list_wal(storage).await? {
            let Some(entry) = get_wal(storage, &id).await? else {
                continue;
            };
            if entry.kind != STATIC_WAL_KIND {
                continue;
            }
            let wal: StaticWal = match entry.decode() {
                Ok(wal) => wal,
                Err(e) => {
                    warn!(wal_id = %id, error = %e, "deleting malformed static WAL");
                    delete_wal(storage, &id).await?;
                    continue;
                }
            };
            let Some(role) = self.store.static_role(&wal.role_name).await? else {
                debug!(wal_id = %id, role = %wal.role_name, "deleting WAL of missing role");
                delete_wal(storage, &id).await?;
                continue;
            };
            if role.last_vault_rotation > wal.last_vault_rotation_was {
                info!(wal_id = %id, role = %wal.role_name, "deleting stale static WAL");
                delete_wal(storage, &id).await?;
                continue;
            }
            let superseded = newest
                .get(&wal.role_name)
                .is_some_and(|(_, prior_at)| *prior_at >= entry.created_at);
            if superseded {
                debug!(wal_id = %id, role = %wal.role_name, "deleting superseded static WAL");
                delete_wal(storage, &id).await?;
            } else if let Some((prior_id, _)) = newest.insert(wal.role_name.clone(), (id, entry.created_at)) {
                debug!(wal_id = %prior_id, role = %wal.role_name, "deleting superseded static WAL");
                delete_wal(storage, &prior_id).await?;
            }
        }
        Ok(newest.into_iter().map(|(role, (id, _))| (role, id)).collect())
    }

    /// Put roles back on the queue that still have a pending static WAL but
    /// dropped out of it, e.g. after a permanent rotation failure. Called by
    /// the rollback loop.
    pub(crate) async fn requeue_pending_static_wals(&self) -> BackendResult<()> {
        let storage = self.store.storage();
        for (name, wal_id) in self.load_static_wals().await? {
            if self.queue.get(&name).is_some() {
                continue;
            }
            let _guard = self.role_locks.lock(&name).await;
            // A rotation may have finished while we waited for the lock.
            if self.queue.get(&name).is_some() || get_wal(storage, &wal_id).await?.is_none() {
                continue;
            }
            let Some(role) = self.store.static_role(&name).await? else {
                continue;
            };
            info!(role = %name, wal_id = %wal_id, "requeueing static role with pending WAL");
            self.requeue_role(role, Some(wal_id), self.clock.now().timestamp());
        }
        Ok(())
    }

    /// Rotate every static role whose time has come. Called by the worker
    /// on each tick.
    pub async fn rotate_due_credentials(&self) {
        loop {
            let now = self.clock.now();
            let Some(item) = self.queue.pop_due(now.timestamp()) else {
                break;
            };
            self.rotate_queued(item, now).await;
        }
    }

    #[instrument(skip(self, item), fields(role = %item.key))]
    async fn rotate_queued(&self, item: Item<QueuedRole>, now: DateTime<Utc>) {
        let name = item.key.clone();
        let _guard = self.role_locks.lock(&name).await;

        let mut role = match self.store.static_role(&name).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                debug!("static role deleted, dropping from queue");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to load static role, retrying later");
                self.requeue(item, self.retry_at(now));
                return;
            }
        };

        match role.in_rotation_window(now) {
            Ok(true) => {}
            Ok(false) => {
                match role.cadence().and_then(|c| c.next_after(now)) {
                    Ok(next) => {
                        info!(next = %next, "outside rotation window, skipping to next scheduled time");
                        role.next_vault_rotation = Some(next);
                        if let Err(e) = self.store.put_static_role(&role).await {
                            warn!(error = %e, "failed to persist rescheduled rotation");
                        }
                        let wal_id = item.value.wal_id.clone();
                        self.requeue_role(role, wal_id, due_priority(next));
                    }
                    Err(e) => error!(error = %e, "invalid cadence, removing from rotation queue"),
                }
                return;
            }
            Err(e) => {
                error!(error = %e, "invalid cadence, removing from rotation queue");
                return;
            }
        }

        let result = self.set_static_account(&role, item.value.wal_id.clone(), now).await;
        self.finish_rotation(role, result, now, Operation::Update);
    }

    /// Queue the outcome of a rotation and record it.
    pub(crate) fn finish_rotation(
        &self,
        role: StaticRole,
        result: Result<StaticRole, RotationFailure>,
        now: DateTime<Utc>,
        operation: Operation,
    ) -> Option<BackendError> {
        let name = role.name.clone();
        let db_name = role.db_name.clone();
        match result {
            Ok(rotated) => {
                let next = rotated.next_vault_rotation.unwrap_or(now);
                info!(role = %name, next = %next, "rotated static role credentials");
                self.requeue_role(rotated, None, due_priority(next));
                self.metrics.record_rotation("success");
                self.events
                    .emit(events::STATIC_ROTATE_SUCCESS, operation, Some(&db_name), &[("name", &name)]);
                None
            }
            Err(failure) => {
                let error_text = failure.error.to_string();
                if failure.error.is_retryable() {
                    warn!(role = %name, error = %error_text, "static rotation failed, will retry");
                    self.requeue_role(role, failure.wal_id, self.retry_at(now));
                    self.metrics.record_rotation("retry");
                } else {
                    error!(
                        role = %name,
                        error = %error_text,
                        "static rotation failed permanently, removing role from automatic rotation"
                    );
                    self.metrics.record_rotation("failure");
                }
                self.events.emit(
                    events::STATIC_ROTATE_FAIL,
                    operation,
                    Some(&db_name),
                    &[("name", &name), ("error", &error_text)],
                );
                Some(failure.error)
            }
        }
    }

    fn retry_at(&self, now: DateTime<Utc>) -> i64 {
        let retry = i64::try_from(self.config.rotation_retry_interval.as_secs()).unwrap_or(i64::MAX);
        now.timestamp().saturating_add(retry)
    }

    fn requeue(&self, item: Item<QueuedRole>, priority: i64) {
        let key = item.key.clone();
        if let Err(e) = self.queue.upsert(Item::new(item.key, priority, item.value)) {
            warn!(role = %key, error = %e, "failed to requeue static role");
        }
    }

    pub(crate) fn requeue_role(&self, role: StaticRole, wal_id: Option<String>, priority: i64) {
        let name = role.name.clone();
        if let Err(e) = self.queue.upsert(QueuedRole::item(role, wal_id, priority)) {
            warn!(role = %name, error = %e, "failed to queue static role");
        }
    }

    /// Give `role` a new credential: reuse the WAL's credential or generate
    /// one, record it, set it through the plugin, persist the role and drop
    /// the WAL. Returns the updated role.
    pub(crate) async fn set_static_account(
        &self,
        role: &StaticRole,
        wal_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<StaticRole, RotationFailure> {
        let storage = self.store.storage();
        let fail = |e: BackendError, id: Option<String>| RotationFailure::new(e, id);

        let connection = match self.store.connection(&role.db_name).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                return Err(fail(
                    BackendError::invalid_request(format!("could not find connection {:?}", role.db_name)),
                    wal_id,
                ))
            }
            Err(e) => return Err(fail(e, wal_id)),
        };
        let instance = self.get_connection(&role.db_name).await.map_err(|e| fail(e, wal_id.clone()))?;

        // A WAL of this role that holds no usable credential is replaced
        // by a fresh one below and must not outlive it. One recorded for a
        // different role is left to that role's reconciliation.
        let (replay, unusable) = match &wal_id {
            Some(id) => match get_wal(storage, id).await {
                Ok(Some(entry)) if entry.kind == STATIC_WAL_KIND => match entry.decode::<StaticWal>() {
                    Ok(wal) if wal.role_name != role.name => (None, None),
                    Ok(wal) => {
                        let credential = wal.credential();
                        let unusable = credential.is_none().then(|| id.clone());
                        (credential, unusable)
                    }
                    Err(_) => (None, Some(id.clone())),
                },
                Ok(_) => (None, None),
                Err(e) => return Err(fail(e.into(), wal_id.clone())),
            },
            None => (None, None),
        };

        let (credential, wal_id) = match replay {
            Some(credential) => (credential, wal_id),
            None => {
                let config = CredentialConfig::parse(role.credential_type, &role.credential_config)
                    .map_err(|e| fail(e, None))?;
                let credential = self
                    .credentials
                    .generate(self.system.as_ref(), &config, &connection.password_policy)
                    .await
                    .map_err(|e| fail(e, None))?;
                let wal = StaticWal {
                    role_name: role.name.clone(),
                    username: role.username.clone(),
                    new_password: credential.password().unwrap_or_default().to_string(),
                    new_private_key: credential.private_key().unwrap_or_default().to_string(),
                    new_public_key: credential
                        .public_key()
                        .map(|pem| String::from_utf8_lossy(&pem).into_owned())
                        .unwrap_or_default(),
                    last_vault_rotation_was: role.last_vault_rotation,
                };
                let id = put_wal(storage, STATIC_WAL_KIND, &wal, self.clock.now())
                    .await
                    .map_err(|e| fail(e.into(), None))?;
                if let Some(old_id) = unusable {
                    debug!(role = %role.name, wal_id = %old_id, "deleting unusable static WAL");
                    if let Err(e) = delete_wal(storage, &old_id).await {
                        warn!(role = %role.name, wal_id = %old_id, error = %e, "failed to delete static WAL");
                    }
                }
                (credential, Some(id))
            }
        };

        let statements = Statements::new(role.rotation_statements.clone());
        let mut request = UpdateUserRequest {
            username: role.username.clone(),
            credential_type: role.credential_type,
            ..UpdateUserRequest::default()
        };
        match role.credential_type {
            CredentialType::Password => {
                request.password = Some(ChangePassword {
                    new_password: credential.password().unwrap_or_default().to_string(),
                    statements,
                });
            }
            CredentialType::RsaPrivateKey => {
                request.public_key = Some(ChangePublicKey {
                    new_public_key: credential.public_key().unwrap_or_default(),
                    statements,
                });
            }
        }
        instance
            .wrapper()
            .update_user(request, false)
            .await
            .map_err(|e| fail(e, wal_id.clone()))?;

        let mut rotated = role.clone();
        match &credential {
            GeneratedCredential::Password(_) => {
                rotated.password = credential.password().map(str::to_string);
            }
            GeneratedCredential::KeyPair { .. } => {
                rotated.private_key = credential.private_key().map(str::to_string);
            }
        }
        rotated.last_vault_rotation = Some(now);
        rotated.schedule_next(now).map_err(|e| fail(e, wal_id.clone()))?;
        self.store
            .put_static_role(&rotated)
            .await
            .map_err(|e| fail(e, wal_id.clone()))?;

        if let Some(id) = &wal_id {
            if let Err(e) = delete_wal(storage, id).await {
                warn!(role = %role.name, wal_id = %id, error = %e, "failed to delete static WAL");
            }
        }
        Ok(rotated)
    }

    /// Delete every static WAL recorded for `role_name`.
    pub(crate) async fn delete_static_wals(&self, role_name: &str) -> BackendResult<()> {
        let storage = self.store.storage();
        for id in list_wal(storage).await? {
            let Some(entry) = get_wal(storage, &id).await? else {
                continue;
            };
            if entry.kind != STATIC_WAL_KIND {
                continue;
            }
            if entry
                .decode::<StaticWal>()
                .map(|wal| wal.role_name == role_name)
                .unwrap_or(true)
            {
                delete_wal(storage, &id).await?;
            }
        }
        Ok(())
    }

    /// Next rotation time of `name` in the queue, as a Unix timestamp.
    #[must_use]
    pub fn queued_rotation(&self, name: &str) -> Option<i64> {
        self.queue.get(name).map(|item| item.priority)
    }
}
