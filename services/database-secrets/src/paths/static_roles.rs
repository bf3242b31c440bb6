//! `static-roles/`, `static-roles/<name>` and `static-creds/<name>`.

use super::field_data;
use super::roles::credential_type_field;
use crate::backend::DatabaseBackend;
use crate::credentials::CredentialConfig;
use crate::error::{BackendError, BackendResult};
use crate::events;
use crate::model::StaticRole;
use crate::rotation::due_priority;
use dbplugin::CredentialType;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};
use vault_sdk::framework::{FieldData, FieldSchema, FieldType};
use vault_sdk::{Request, Response};

fn schema() -> Vec<FieldSchema> {
    vec![
        FieldSchema::new("username", FieldType::String).required(),
        FieldSchema::new("db_name", FieldType::String).required(),
        FieldSchema::new("rotation_statements", FieldType::CommaStringSlice),
        FieldSchema::new("credential_type", FieldType::String),
        FieldSchema::new("credential_config", FieldType::Map),
        FieldSchema::new("rotation_period", FieldType::DurationSecond),
        FieldSchema::new("rotation_schedule", FieldType::String),
        FieldSchema::new("rotation_window", FieldType::DurationSecond),
        FieldSchema::new("skip_import_rotation", FieldType::Bool),
        FieldSchema::new("password", FieldType::String),
    ]
}

/// Cadence fields shared by static-role and static-creds reads.
fn cadence_fields(role: &StaticRole, data: &mut Map<String, Value>) {
    match (&role.rotation_period, &role.rotation_schedule) {
        (Some(period), _) => {
            data.insert("rotation_period".into(), json!(period));
        }
        (None, Some(schedule)) => {
            data.insert("rotation_schedule".into(), json!(schedule));
            if let Some(window) = role.rotation_window {
                data.insert("rotation_window".into(), json!(window));
            }
        }
        (None, None) => {}
    }
}

impl DatabaseBackend {
    pub(super) async fn static_role_list(&self) -> BackendResult<Option<Response>> {
        Ok(Some(Response::list_response(self.store.list_static_roles().await?)))
    }

    #[instrument(skip(self, req))]
    pub(super) async fn static_role_read(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        let Some(role) = self.store.static_role(name).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("db_name".into(), json!(role.db_name));
        data.insert("username".into(), json!(role.username));
        data.insert("rotation_statements".into(), json!(role.rotation_statements));
        data.insert("credential_type".into(), json!(role.credential_type.as_str()));
        if !role.credential_config.is_empty() {
            data.insert("credential_config".into(), Value::Object(role.credential_config.clone()));
        }
        if let Some(last) = role.last_vault_rotation {
            data.insert("last_vault_rotation".into(), json!(last.to_rfc3339()));
        }
        cadence_fields(&role, &mut data);

        self.events
            .emit(events::STATIC_ROLE_READ, req.operation, Some(&role.db_name), &[("name", name)]);
        Ok(Some(Response::with_data(data)))
    }

    #[instrument(skip(self, req))]
    pub(super) async fn static_role_write(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        if self.store.role(name).await?.is_some() {
            return Err(BackendError::invalid_request("Role and Static Role names must be unique"));
        }
        let _guard = self.role_locks.lock(name).await;

        let existing = self.store.static_role(name).await?;
        let is_create = existing.is_none();
        let fields = field_data(req, &schema(), is_create)?;
        let mut role = match existing {
            Some(role) => role,
            None => new_static_role(name, &fields)?,
        };
        let cadence_before = (role.rotation_period, role.rotation_schedule.clone(), role.rotation_window);
        apply_fields(&mut role, &fields, is_create)?;

        let connection = self.store.connection(&role.db_name).await?.ok_or_else(|| {
            BackendError::invalid_request(format!("could not find connection with name {:?}", role.db_name))
        })?;
        if !connection.is_role_allowed(name) {
            return Err(BackendError::invalid_request(format!(
                "{name:?} is not an allowed role for connection {:?}",
                role.db_name
            )));
        }

        let now = self.clock.now();
        if is_create {
            let skip = fields
                .get_bool("skip_import_rotation")?
                .unwrap_or(connection.skip_static_role_import_rotation);
            if skip {
                role.password = fields.get_string("password")?.filter(|p| !p.is_empty());
                role.schedule_next(now)?;
                self.store.put_static_role(&role).await?;
                info!(role = name, "static role imported without rotation");
                self.requeue_role(role.clone(), None, schedule_priority(&role, now));
            } else {
                match self.set_static_account(&role, None, now).await {
                    Ok(rotated) => {
                        info!(role = name, "static role created with initial rotation");
                        let priority = schedule_priority(&rotated, now);
                        self.requeue_role(rotated, None, priority);
                    }
                    Err(failure) => {
                        if failure.wal_id.is_some() {
                            if let Err(e) = self.delete_static_wals(name).await {
                                warn!(role = name, error = %e, "failed to clean up WAL of rejected static role");
                            }
                        }
                        return Err(failure.error);
                    }
                }
            }
        } else {
            let cadence_after = (role.rotation_period, role.rotation_schedule.clone(), role.rotation_window);
            if cadence_after != cadence_before {
                role.schedule_next(now)?;
            }
            self.store.put_static_role(&role).await?;
            let wal_id = self.queue.get(name).and_then(|item| item.value.wal_id);
            let priority = schedule_priority(&role, now);
            self.requeue_role(role.clone(), wal_id, priority);
        }

        let event = if is_create {
            events::STATIC_ROLE_CREATE
        } else {
            events::STATIC_ROLE_UPDATE
        };
        self.events.emit(event, req.operation, Some(&role.db_name), &[("name", name)]);
        Ok(None)
    }

    #[instrument(skip(self, req))]
    pub(super) async fn static_role_delete(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        let _guard = self.role_locks.lock(name).await;
        self.queue.pop_by_key(name);
        self.store.delete_static_role(name).await?;
        self.delete_static_wals(name).await?;
        self.events.emit(events::STATIC_ROLE_DELETE, req.operation, None, &[("name", name)]);
        Ok(None)
    }

    #[instrument(skip(self, req))]
    pub(super) async fn static_creds_read(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        let Some(role) = self.store.static_role(name).await? else {
            return Err(BackendError::invalid_request(format!("unknown role: {name}")));
        };
        let connection = self.store.connection(&role.db_name).await?.ok_or_else(|| {
            BackendError::invalid_request(format!("could not find connection with name {:?}", role.db_name))
        })?;
        if !connection.is_role_allowed(name) {
            return Err(BackendError::PermissionDenied);
        }

        let now = self.clock.now();
        let mut data = Map::new();
        data.insert("username".into(), json!(role.username));
        data.insert("credential_type".into(), json!(role.credential_type.as_str()));
        match role.credential_type {
            CredentialType::Password => {
                data.insert("password".into(), json!(role.password.clone().unwrap_or_default()));
            }
            CredentialType::RsaPrivateKey => {
                data.insert("rsa_private_key".into(), json!(role.private_key.clone().unwrap_or_default()));
            }
        }
        data.insert("ttl".into(), json!(role.ttl(now).as_secs()));
        if let Some(last) = role.last_vault_rotation {
            data.insert("last_vault_rotation".into(), json!(last.to_rfc3339()));
        }
        cadence_fields(&role, &mut data);

        self.events
            .emit(events::STATIC_CREDS_READ, req.operation, Some(&role.db_name), &[("name", name)]);
        Ok(Some(Response::with_data(data)))
    }
}

fn schedule_priority(role: &StaticRole, now: chrono::DateTime<chrono::Utc>) -> i64 {
    role.next_vault_rotation.map_or(now.timestamp(), due_priority)
}

fn new_static_role(name: &str, fields: &FieldData) -> BackendResult<StaticRole> {
    let username = fields
        .get_string("username")?
        .filter(|u| !u.is_empty())
        .ok_or_else(|| BackendError::invalid_request("username is a required field to create a static account"))?;
    let db_name = fields
        .get_string("db_name")?
        .filter(|d| !d.is_empty())
        .ok_or_else(|| BackendError::invalid_request("empty database name attribute"))?;
    Ok(StaticRole {
        name: name.to_string(),
        db_name,
        username,
        rotation_statements: Vec::new(),
        credential_type: CredentialType::Password,
        credential_config: Map::new(),
        rotation_period: None,
        rotation_schedule: None,
        rotation_window: None,
        password: None,
        private_key: None,
        last_vault_rotation: None,
        next_vault_rotation: None,
    })
}

/// Overlay the request onto `role` and validate the result.
fn apply_fields(role: &mut StaticRole, fields: &FieldData, is_create: bool) -> BackendResult<()> {
    if !is_create {
        if let Some(username) = fields.get_string("username")? {
            if username != role.username {
                return Err(BackendError::UsernameChange);
            }
        }
        if let Some(db_name) = fields.get_string("db_name")? {
            if db_name != role.db_name {
                return Err(BackendError::invalid_request("cannot update static role db_name"));
            }
        }
    }

    if let Some(statements) = fields.get_strings("rotation_statements")? {
        role.rotation_statements = statements;
    }

    let credential_type = credential_type_field(fields, role.credential_type)?;
    if credential_type != role.credential_type && !fields.contains("credential_config") {
        role.credential_config = Map::new();
    }
    role.credential_type = credential_type;
    if let Some(config) = fields.get_map("credential_config")? {
        role.credential_config = config;
    }
    CredentialConfig::parse(role.credential_type, &role.credential_config)?;

    let period = fields.get_duration("rotation_period")?.map(|d| d.as_secs());
    let schedule = fields.get_string("rotation_schedule")?.filter(|s| !s.is_empty());
    let window = fields.get_duration("rotation_window")?.map(|d| d.as_secs());
    match (period, schedule) {
        (Some(period), None) => {
            role.rotation_period = Some(period);
            role.rotation_schedule = None;
            role.rotation_window = window;
        }
        (None, Some(schedule)) => {
            role.rotation_schedule = Some(schedule);
            role.rotation_period = None;
            role.rotation_window = window.or(role.rotation_window);
        }
        (Some(period), Some(schedule)) => {
            role.rotation_period = Some(period);
            role.rotation_schedule = Some(schedule);
        }
        (None, None) => {
            if window.is_some() {
                role.rotation_window = window;
            }
        }
    }
    role.cadence()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(body: Value) -> FieldData {
        FieldData::new(body.as_object().unwrap().clone(), &schema())
    }

    fn role() -> StaticRole {
        new_static_role("app", &fields(json!({"username": "app", "db_name": "pg"}))).unwrap()
    }

    #[test]
    fn test_username_change_rejected() {
        let mut role = role();
        role.rotation_period = Some(60);
        let err = apply_fields(&mut role, &fields(json!({"username": "other"})), false).unwrap_err();
        assert!(matches!(err, BackendError::UsernameChange));
    }

    #[test]
    fn test_db_name_change_rejected() {
        let mut role = role();
        role.rotation_period = Some(60);
        assert!(apply_fields(&mut role, &fields(json!({"db_name": "other"})), false).is_err());
    }

    #[test]
    fn test_cadence_switch_clears_other_field() {
        let mut role = role();
        apply_fields(&mut role, &fields(json!({"rotation_period": "1h"})), true).unwrap();
        assert_eq!(role.rotation_period, Some(3600));

        apply_fields(
            &mut role,
            &fields(json!({"rotation_schedule": "0 0 * * *", "rotation_window": 7200})),
            false,
        )
        .unwrap();
        assert_eq!(role.rotation_period, None);
        assert_eq!(role.rotation_window, Some(7200));
    }

    #[test]
    fn test_both_cadences_rejected() {
        let mut role = role();
        let err = apply_fields(
            &mut role,
            &fields(json!({"rotation_period": 60, "rotation_schedule": "* * * * *"})),
            true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_cadence_required_on_create() {
        let mut role = role();
        assert!(apply_fields(&mut role, &fields(json!({})), true).is_err());
    }
}
