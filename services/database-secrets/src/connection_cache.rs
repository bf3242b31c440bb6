//! Live plugin instances keyed by connection name.
//!
//! The map never creates instances itself; creation happens in the backend
//! under its creation lock and lands here through [`ConnectionCache::put_if_empty`]
//! or, on reconfiguration, [`ConnectionCache::put`].

use crate::error::{BackendError, BackendResult};
use crate::version_wrapper::DatabaseVersionWrapper;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::IntGauge;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;
use vault_sdk::SystemView;

/// A running plugin owned by the cache.
#[derive(Debug)]
pub struct DatabaseInstance {
    id: String,
    name: String,
    plugin_name: String,
    plugin_version: String,
    wrapper: DatabaseVersionWrapper,
}

impl DatabaseInstance {
    /// Wrap an initialized plugin. Every instance gets a fresh id.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        plugin_name: impl Into<String>,
        plugin_version: impl Into<String>,
        wrapper: DatabaseVersionWrapper,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            plugin_name: plugin_name.into(),
            plugin_version: plugin_version.into(),
            wrapper,
        }
    }

    /// Instance id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin catalog name.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Plugin version actually running.
    #[must_use]
    pub fn plugin_version(&self) -> &str {
        &self.plugin_version
    }

    /// The plugin.
    #[must_use]
    pub const fn wrapper(&self) -> &DatabaseVersionWrapper {
        &self.wrapper
    }

    /// Close the plugin, logging failures.
    pub async fn close(&self) {
        if let Err(e) = self.wrapper.close().await {
            warn!(connection = %self.name, instance = %self.id, error = %e, "error closing plugin");
        }
    }
}

/// Concurrent map of connection name to instance.
#[derive(Debug, Default)]
pub struct ConnectionCache {
    connections: DashMap<String, Arc<DatabaseInstance>>,
    closed: AtomicBool,
    gauge: Option<IntGauge>,
}

impl ConnectionCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty cache reporting its size to `gauge`.
    #[must_use]
    pub fn with_gauge(gauge: IntGauge) -> Self {
        Self {
            gauge: Some(gauge),
            ..Self::default()
        }
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BackendError::CacheClosed)
        } else {
            Ok(())
        }
    }

    fn report(&self) {
        if let Some(gauge) = &self.gauge {
            gauge.set(i64::try_from(self.connections.len()).unwrap_or(i64::MAX));
        }
    }

    /// Instance for `name`, if one is live.
    ///
    /// # Errors
    ///
    /// Fails once the cache is closed.
    pub fn get(&self, name: &str) -> BackendResult<Option<Arc<DatabaseInstance>>> {
        self.ensure_open()?;
        Ok(self.connections.get(name).map(|entry| Arc::clone(entry.value())))
    }

    /// Insert `instance`, returning the one it displaced so the caller can
    /// close it.
    ///
    /// # Errors
    ///
    /// Fails once the cache is closed.
    pub fn put(&self, instance: Arc<DatabaseInstance>) -> BackendResult<Option<Arc<DatabaseInstance>>> {
        self.ensure_open()?;
        let old = self.connections.insert(instance.name().to_string(), instance);
        self.report();
        Ok(old)
    }

    /// Insert `instance` only if no instance exists for its name. Returns the
    /// existing instance when one was already present; `instance` is then
    /// not stored.
    ///
    /// # Errors
    ///
    /// Fails once the cache is closed.
    pub fn put_if_empty(&self, instance: Arc<DatabaseInstance>) -> BackendResult<Option<Arc<DatabaseInstance>>> {
        self.ensure_open()?;
        let existing = match self.connections.entry(instance.name().to_string()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(instance);
                None
            }
        };
        self.report();
        Ok(existing)
    }

    /// Remove and return the instance for `name`.
    ///
    /// # Errors
    ///
    /// Fails once the cache is closed.
    pub fn delete(&self, name: &str) -> BackendResult<Option<Arc<DatabaseInstance>>> {
        self.ensure_open()?;
        let removed = self.connections.remove(name).map(|(_, instance)| instance);
        self.report();
        Ok(removed)
    }

    /// Remove and close the instance for `name`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Fails once the cache is closed.
    pub async fn reset(&self, name: &str) -> BackendResult<bool> {
        match self.delete(name)? {
            Some(instance) => {
                debug!(connection = name, instance = instance.id(), "evicting plugin");
                instance.close().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every instance. Later operations fail with
    /// [`BackendError::CacheClosed`]; closing twice is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let names: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, instance)) = self.connections.remove(&name) {
                instance.close().await;
            }
        }
        self.report();
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no instance is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

fn parse_version(version: &str) -> Option<semver::Version> {
    semver::Version::parse(version.trim_start_matches('v')).ok()
}

/// Version to persist for a connection config.
///
/// A pinned plugin persists an empty version and resolves the pin at load
/// time. A requested version equal to a builtin version is normalized to
/// empty. With no request, the highest registered non-builtin version wins,
/// or empty when only builtins exist.
///
/// # Errors
///
/// Returns a validation error for a version alongside a pin, a malformed
/// version, or a version the host does not know.
pub async fn select_plugin_version(
    system: &dyn SystemView,
    plugin_name: &str,
    requested: &str,
) -> BackendResult<String> {
    if let Some(pinned) = system.pinned_plugin_version(plugin_name).await? {
        if !requested.is_empty() {
            return Err(BackendError::invalid_request(format!(
                "cannot specify plugin_version for plugin {plugin_name:?}: pinned to {pinned}"
            )));
        }
        return Ok(String::new());
    }

    let versions = system.list_plugin_versions(plugin_name).await?;
    if !requested.is_empty() {
        if parse_version(requested).is_none() {
            return Err(BackendError::invalid_request(format!(
                "invalid plugin_version {requested:?}: must be a semantic version"
            )));
        }
        let Some(found) = versions.iter().find(|v| v.version == requested) else {
            return Err(BackendError::invalid_request(format!(
                "plugin {plugin_name:?} version {requested:?} not found"
            )));
        };
        return Ok(if found.builtin { String::new() } else { requested.to_string() });
    }

    Ok(versions
        .iter()
        .filter(|v| !v.builtin)
        .filter_map(|v| parse_version(&v.version).map(|parsed| (parsed, &v.version)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, version)| version.clone())
        .unwrap_or_default())
}

/// Version to run for a stored config: the host pin if any, else the stored
/// version.
///
/// # Errors
///
/// Returns the host error if the pin lookup fails.
pub async fn running_plugin_version(
    system: &dyn SystemView,
    plugin_name: &str,
    stored: &str,
) -> BackendResult<String> {
    Ok(system
        .pinned_plugin_version(plugin_name)
        .await?
        .unwrap_or_else(|| stored.to_string()))
}
