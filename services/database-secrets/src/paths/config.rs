//! `config/` and `config/<name>`: connection configuration.

use super::field_data;
use crate::backend::DatabaseBackend;
use crate::connection_cache::select_plugin_version;
use crate::error::{BackendError, BackendResult};
use crate::events;
use crate::model::{parse_schedule, ConnectionConfig, MIN_ROTATION_WINDOW};
use crate::store::redact_connection_details;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};
use vault_sdk::framework::{FieldData, FieldSchema, FieldType};
use vault_sdk::{Request, Response, RotationJob, StringTemplate};

const FIELDS: &[&str] = &[
    "name",
    "plugin_name",
    "plugin_version",
    "verify_connection",
    "allowed_roles",
    "root_rotation_statements",
    "password_policy",
    "skip_static_role_import_rotation",
    "rotation_period",
    "rotation_schedule",
    "rotation_window",
    "disable_automated_rotation",
];

fn schema() -> Vec<FieldSchema> {
    vec![
        FieldSchema::new("plugin_name", FieldType::String),
        FieldSchema::new("plugin_version", FieldType::String),
        FieldSchema::new("verify_connection", FieldType::Bool),
        FieldSchema::new("allowed_roles", FieldType::CommaStringSlice),
        FieldSchema::new("root_rotation_statements", FieldType::CommaStringSlice),
        FieldSchema::new("password_policy", FieldType::String),
        FieldSchema::new("skip_static_role_import_rotation", FieldType::Bool),
        FieldSchema::new("rotation_period", FieldType::DurationSecond),
        FieldSchema::new("rotation_schedule", FieldType::String),
        FieldSchema::new("rotation_window", FieldType::DurationSecond),
        FieldSchema::new("disable_automated_rotation", FieldType::Bool),
    ]
}

/// Rotation-manager path of a connection's root rotation job.
pub(crate) fn rotation_job_path(name: &str) -> String {
    format!("rotate-root/{name}")
}

impl DatabaseBackend {
    pub(super) async fn config_list(&self) -> BackendResult<Option<Response>> {
        let names = self.store.list_connections().await?;
        Ok(Some(Response::list_response(names)))
    }

    #[instrument(skip(self, req))]
    pub(super) async fn config_read(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        let Some(config) = self.store.connection(name).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("plugin_name".into(), json!(config.plugin_name));
        data.insert("plugin_version".into(), json!(config.plugin_version));
        data.insert(
            "connection_details".into(),
            Value::Object(redact_connection_details(&config.connection_details)),
        );
        data.insert("allowed_roles".into(), json!(config.allowed_roles));
        data.insert("root_rotation_statements".into(), json!(config.root_rotation_statements));
        data.insert("password_policy".into(), json!(config.password_policy));
        data.insert("verify_connection".into(), json!(config.verify_connection));
        data.insert(
            "skip_static_role_import_rotation".into(),
            json!(config.skip_static_role_import_rotation),
        );
        data.insert("rotation_period".into(), json!(config.rotation_period.unwrap_or(0)));
        data.insert(
            "rotation_schedule".into(),
            json!(config.rotation_schedule.clone().unwrap_or_default()),
        );
        data.insert("rotation_window".into(), json!(config.rotation_window.unwrap_or(0)));
        data.insert("disable_automated_rotation".into(), json!(config.disable_automated_rotation));

        self.events.emit(events::CONFIG_READ, req.operation, Some(name), &[]);
        Ok(Some(Response::with_data(data)))
    }

    #[instrument(skip(self, req))]
    pub(super) async fn config_write(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        let existing = self.store.connection(name).await?;
        let fields = field_data(req, &schema(), existing.is_none())?;
        let mut config = apply_fields(existing.clone(), name, &fields, req)?;

        let requested_version = fields.get_string("plugin_version")?;
        config.plugin_version = match (requested_version, &existing) {
            (Some(version), _) => select_plugin_version(self.system.as_ref(), &config.plugin_name, &version).await?,
            (None, Some(prior)) if prior.plugin_name == config.plugin_name => prior.plugin_version.clone(),
            (None, _) => select_plugin_version(self.system.as_ref(), &config.plugin_name, "").await?,
        };

        if let Some(template) = config.connection_details.get("username_template").and_then(Value::as_str) {
            StringTemplate::new(template)
                .map_err(|e| BackendError::invalid_request(format!("unable to parse username_template: {e}")))?;
        }
        validate_root_rotation(&config)?;

        let had_job = existing.as_ref().is_some_and(ConnectionConfig::wants_automated_rotation);
        self.replace_connection(req, &mut config, had_job).await?;

        info!(
            connection = name,
            plugin = %config.plugin_name,
            version = %config.plugin_version,
            "connection configured"
        );
        self.events.emit(
            events::CONFIG_WRITE,
            req.operation,
            Some(name),
            &[("plugin_name", config.plugin_name.as_str())],
        );
        Ok(None)
    }

    /// Build and initialize a plugin for `config`, persist the config with
    /// the details the plugin returned, then swap the new instance into the
    /// cache and close the old one. Runs under the creation lock.
    async fn replace_connection(
        &self,
        req: &Request,
        config: &mut ConnectionConfig,
        had_job: bool,
    ) -> BackendResult<()> {
        let _guard = self.create_lock.lock().await;
        let (instance, details) = self.build_instance(config, config.verify_connection).await?;
        if !details.is_empty() {
            config.connection_details = details;
        }

        let job_path = rotation_job_path(&config.name);
        let mount = self.rotation_mount(req);
        let job_change = if config.wants_automated_rotation() {
            let job = RotationJob {
                mount_point: mount.clone(),
                path: job_path.clone(),
                schedule: config.root_rotation_schedule(),
            };
            match self.system.register_rotation_job(job).await {
                Ok(id) => Some(format!("registered rotation job {id}")),
                Err(e) => {
                    instance.close().await;
                    return Err(BackendError::invalid_request(format!("error registering rotation job: {e}")));
                }
            }
        } else if had_job {
            if let Err(e) = self.system.deregister_rotation_job(&mount, &job_path).await {
                instance.close().await;
                return Err(BackendError::invalid_request(format!("error deregistering rotation job: {e}")));
            }
            Some("deregistered rotation job".to_string())
        } else {
            None
        };

        if let Err(e) = self.store.put_connection(config).await {
            instance.close().await;
            return Err(match job_change {
                Some(done) => BackendError::RotationSkew(format!(
                    "{done} but failed to write connection {:?} to storage: {e}",
                    config.name
                )),
                None => e,
            });
        }

        if let Some(old) = self.connections.put(instance)? {
            old.close().await;
        }
        Ok(())
    }

    #[instrument(skip(self, req))]
    pub(super) async fn config_delete(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        let existing = self.store.connection(name).await?;
        let deregistered = match existing {
            Some(config) if config.wants_automated_rotation() => {
                let mount = self.rotation_mount(req);
                self.system
                    .deregister_rotation_job(&mount, &rotation_job_path(name))
                    .await
                    .map_err(|e| BackendError::invalid_request(format!("error deregistering rotation job: {e}")))?;
                true
            }
            _ => false,
        };

        if let Err(e) = self.store.delete_connection(name).await {
            return Err(if deregistered {
                BackendError::RotationSkew(format!(
                    "deregistered rotation job but failed to delete connection {name:?} from storage: {e}"
                ))
            } else {
                e
            });
        }
        if let Err(e) = self.connections.reset(name).await {
            warn!(connection = name, error = %e, "failed to evict deleted connection");
        }

        self.events.emit(events::CONFIG_DELETE, req.operation, Some(name), &[]);
        Ok(None)
    }

    /// Mount path rotation jobs are registered under.
    fn rotation_mount(&self, req: &Request) -> String {
        if req.mount_point.is_empty() {
            self.config.mount_path.clone()
        } else {
            req.mount_point.clone()
        }
    }
}

/// Overlay the request onto `existing` (or a fresh config). Unknown body
/// keys become connection details; secret details left out of an update
/// keep their stored values.
fn apply_fields(
    existing: Option<ConnectionConfig>,
    name: &str,
    fields: &FieldData,
    req: &Request,
) -> BackendResult<ConnectionConfig> {
    let plugin_name = fields.get_string("plugin_name")?.filter(|p| !p.is_empty());
    let mut config = match (existing, plugin_name) {
        (Some(mut prior), plugin) => {
            if let Some(plugin) = plugin {
                prior.plugin_name = plugin;
            }
            prior
        }
        (None, Some(plugin)) => ConnectionConfig::new(name, plugin),
        (None, None) => return Err(BackendError::invalid_request("empty plugin name")),
    };

    if let Some(verify) = fields.get_bool("verify_connection")? {
        config.verify_connection = verify;
    }
    if let Some(roles) = fields.get_strings("allowed_roles")? {
        config.allowed_roles = roles;
    }
    if let Some(statements) = fields.get_strings("root_rotation_statements")? {
        config.root_rotation_statements = statements;
    }
    if let Some(policy) = fields.get_string("password_policy")? {
        config.password_policy = policy;
    }
    if let Some(skip) = fields.get_bool("skip_static_role_import_rotation")? {
        config.skip_static_role_import_rotation = skip;
    }
    if fields.contains("rotation_period") {
        config.rotation_period = fields.get_duration("rotation_period")?.map(|d| d.as_secs()).filter(|&s| s > 0);
    }
    if fields.contains("rotation_schedule") {
        config.rotation_schedule = fields.get_string("rotation_schedule")?.filter(|s| !s.is_empty());
    }
    if fields.contains("rotation_window") {
        config.rotation_window = fields.get_duration("rotation_window")?.map(|d| d.as_secs()).filter(|&s| s > 0);
    }
    if let Some(disable) = fields.get_bool("disable_automated_rotation")? {
        config.disable_automated_rotation = disable;
    }

    for (key, value) in &req.data {
        if !FIELDS.contains(&key.as_str()) {
            config.connection_details.insert(key.clone(), value.clone());
        }
    }
    Ok(config)
}

fn validate_root_rotation(config: &ConnectionConfig) -> BackendResult<()> {
    match (config.rotation_period, config.rotation_schedule.as_deref()) {
        (Some(_), Some(_)) => Err(BackendError::invalid_request(
            "mutually exclusive fields rotation_period and rotation_schedule were both specified",
        )),
        (Some(_), None) if config.rotation_window.is_some() => Err(BackendError::invalid_request(
            "rotation_window is invalid with use of rotation_period",
        )),
        (None, Some(expr)) => {
            parse_schedule(expr)?;
            match config.rotation_window {
                Some(window) if window < MIN_ROTATION_WINDOW.as_secs() => Err(BackendError::invalid_request(
                    format!("rotation_window must be {} seconds or more", MIN_ROTATION_WINDOW.as_secs()),
                )),
                _ => Ok(()),
            }
        }
        _ => Ok(()),
    }
}
