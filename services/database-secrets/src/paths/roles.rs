//! `roles/` and `roles/<name>`: dynamic roles.

use super::field_data;
use crate::backend::DatabaseBackend;
use crate::credentials::CredentialConfig;
use crate::error::{BackendError, BackendResult};
use crate::events;
use crate::model::Role;
use dbplugin::CredentialType;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};
use vault_sdk::framework::{FieldData, FieldSchema, FieldType};
use vault_sdk::{Request, Response};

fn schema() -> Vec<FieldSchema> {
    vec![
        FieldSchema::new("db_name", FieldType::String).required(),
        FieldSchema::new("creation_statements", FieldType::CommaStringSlice),
        FieldSchema::new("revocation_statements", FieldType::CommaStringSlice),
        FieldSchema::new("rollback_statements", FieldType::CommaStringSlice),
        FieldSchema::new("renew_statements", FieldType::CommaStringSlice),
        FieldSchema::new("default_ttl", FieldType::DurationSecond),
        FieldSchema::new("max_ttl", FieldType::DurationSecond),
        FieldSchema::new("credential_type", FieldType::String),
        FieldSchema::new("credential_config", FieldType::Map),
    ]
}

/// Parse `credential_type`, keeping `current` when absent.
pub(super) fn credential_type_field(fields: &FieldData, current: CredentialType) -> BackendResult<CredentialType> {
    match fields.get_string("credential_type")?.filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<CredentialType>().map_err(BackendError::invalid_request),
        None => Ok(current),
    }
}

impl DatabaseBackend {
    pub(super) async fn role_list(&self) -> BackendResult<Option<Response>> {
        Ok(Some(Response::list_response(self.store.list_roles().await?)))
    }

    #[instrument(skip(self, req))]
    pub(super) async fn role_read(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        let Some(role) = self.store.role(name).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("db_name".into(), json!(role.db_name));
        data.insert("creation_statements".into(), json!(role.creation_statements));
        data.insert("revocation_statements".into(), json!(role.revocation_statements));
        data.insert("rollback_statements".into(), json!(role.rollback_statements));
        data.insert("renew_statements".into(), json!(role.renew_statements));
        data.insert("default_ttl".into(), json!(role.default_ttl));
        data.insert("max_ttl".into(), json!(role.max_ttl));
        data.insert("credential_type".into(), json!(role.credential_type.as_str()));
        if !role.credential_config.is_empty() {
            data.insert("credential_config".into(), Value::Object(role.credential_config.clone()));
        }
        self.events.emit(events::ROLE_READ, req.operation, Some(&role.db_name), &[("name", name)]);
        Ok(Some(Response::with_data(data)))
    }

    #[instrument(skip(self, req))]
    pub(super) async fn role_write(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        if self.store.static_role(name).await?.is_some() {
            return Err(BackendError::invalid_request("Role and Static Role names must be unique"));
        }
        let existing = self.store.role(name).await?;
        let is_create = existing.is_none();
        let fields = field_data(req, &schema(), is_create)?;

        let mut role = existing.unwrap_or_else(|| Role {
            name: name.to_string(),
            db_name: String::new(),
            creation_statements: Vec::new(),
            revocation_statements: Vec::new(),
            rollback_statements: Vec::new(),
            renew_statements: Vec::new(),
            default_ttl: 0,
            max_ttl: 0,
            credential_type: CredentialType::Password,
            credential_config: Map::new(),
        });

        if let Some(db_name) = fields.get_string("db_name")?.filter(|s| !s.is_empty()) {
            role.db_name = db_name;
        }
        if role.db_name.is_empty() {
            return Err(BackendError::invalid_request("empty database name attribute"));
        }
        if let Some(statements) = fields.get_strings("creation_statements")? {
            role.creation_statements = statements;
        }
        if role.creation_statements.is_empty() {
            return Err(BackendError::invalid_request("empty creation statements"));
        }
        if let Some(statements) = fields.get_strings("revocation_statements")? {
            role.revocation_statements = statements;
        }
        if let Some(statements) = fields.get_strings("rollback_statements")? {
            role.rollback_statements = statements;
        }
        if let Some(statements) = fields.get_strings("renew_statements")? {
            role.renew_statements = statements;
        }
        if let Some(ttl) = fields.get_duration("default_ttl")? {
            role.default_ttl = ttl.as_secs();
        }
        if let Some(ttl) = fields.get_duration("max_ttl")? {
            role.max_ttl = ttl.as_secs();
        }
        if role.default_ttl > 0 && role.max_ttl > 0 && role.default_ttl > role.max_ttl {
            return Err(BackendError::invalid_request("ttl cannot be greater than max_ttl"));
        }

        let credential_type = credential_type_field(&fields, role.credential_type)?;
        if credential_type != role.credential_type && !fields.contains("credential_config") {
            role.credential_config = Map::new();
        }
        role.credential_type = credential_type;
        if let Some(config) = fields.get_map("credential_config")? {
            role.credential_config = config;
        }
        CredentialConfig::parse(role.credential_type, &role.credential_config)?;

        self.store.put_role(&role).await?;
        debug!(role = name, connection = %role.db_name, "role written");

        let event = if is_create { events::ROLE_CREATE } else { events::ROLE_UPDATE };
        self.events.emit(event, req.operation, Some(&role.db_name), &[("name", name)]);
        Ok(None)
    }

    #[instrument(skip(self, req))]
    pub(super) async fn role_delete(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        self.store.delete_role(name).await?;
        self.events.emit(events::ROLE_DELETE, req.operation, None, &[("name", name)]);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_type_field() {
        let fields = FieldData::new(
            json!({"credential_type": "rsa_private_key"}).as_object().unwrap().clone(),
            &schema(),
        );
        assert_eq!(
            credential_type_field(&fields, CredentialType::Password).unwrap(),
            CredentialType::RsaPrivateKey
        );

        let empty = FieldData::new(Map::new(), &schema());
        assert_eq!(
            credential_type_field(&empty, CredentialType::Password).unwrap(),
            CredentialType::Password
        );

        let bad = FieldData::new(json!({"credential_type": "token"}).as_object().unwrap().clone(), &schema());
        assert!(credential_type_field(&bad, CredentialType::Password).is_err());
    }
}
