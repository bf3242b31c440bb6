//! The engine instance: owned state, lifecycle and request entry point.
//!
//! Operation handlers live in sibling modules as further `impl` blocks on
//! [`DatabaseBackend`]:
//! - [`crate::dynamic`]: dynamic credentials and lease callbacks
//! - [`crate::rotation`]: the static-role queue and rotation procedure
//! - [`crate::root_rotation`]: root credential rotation and its rollback
//! - [`crate::paths`]: request parsing and dispatch

use crate::config::EngineConfig;
use crate::connection_cache::{running_plugin_version, ConnectionCache, DatabaseInstance};
use crate::credentials::CredentialGenerator;
use crate::error::{BackendError, BackendResult};
use crate::events::EventEmitter;
use crate::metrics::EngineMetrics;
use crate::model::ConnectionConfig;
use crate::paths::Router;
use crate::queue::PriorityQueue;
use crate::rotation::{QueuedRole, RoleLocks};
use crate::shutdown::ShutdownCoordinator;
use crate::store::Store;
use crate::version_wrapper::DatabaseVersionWrapper;
use dbplugin::{ErrorSanitizer, InitializeRequest, Middleware, PluginCatalog};
use rust_common::Clock;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use vault_sdk::{EventSender, Request, Response, SdkError, Storage, SystemView};

/// Connection-detail keys whose values are scrubbed from plugin errors.
const SANITIZED_DETAIL_KEYS: &[&str] = &["password", "private_key", "connection_url"];

/// A database secrets engine mounted at one path.
#[derive(Debug)]
pub struct DatabaseBackend {
    pub(crate) config: EngineConfig,
    pub(crate) store: Store,
    pub(crate) catalog: Arc<dyn PluginCatalog>,
    pub(crate) system: Arc<dyn SystemView>,
    pub(crate) events: EventEmitter,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) connections: ConnectionCache,
    pub(crate) create_lock: tokio::sync::Mutex<()>,
    pub(crate) queue: PriorityQueue<QueuedRole>,
    pub(crate) role_locks: RoleLocks,
    pub(crate) credentials: CredentialGenerator,
    pub(crate) metrics: EngineMetrics,
    shutdown: ShutdownCoordinator,
    router: Router,
    started: AtomicBool,
}

impl DatabaseBackend {
    /// Build an engine over the host's collaborators. Nothing runs until
    /// [`initialize`](Self::initialize).
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or metrics cannot be
    /// registered.
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn Storage>,
        catalog: Arc<dyn PluginCatalog>,
        system: Arc<dyn SystemView>,
        events: Arc<dyn EventSender>,
        clock: Arc<dyn Clock>,
    ) -> BackendResult<Arc<Self>> {
        config.validate()?;
        let metrics = EngineMetrics::new()?;
        Ok(Arc::new(Self {
            store: Store::new(storage),
            catalog,
            system,
            events: EventEmitter::new(events, config.mount_path.clone()),
            clock,
            connections: ConnectionCache::with_gauge(metrics.connections.clone()),
            create_lock: tokio::sync::Mutex::new(()),
            queue: PriorityQueue::new(),
            role_locks: RoleLocks::new(config.role_lock_stripes),
            credentials: CredentialGenerator::new(config.password_generation_timeout)?,
            metrics,
            shutdown: ShutdownCoordinator::new(),
            router: Router::new()?,
            started: AtomicBool::new(false),
            config,
        }))
    }

    /// Load the rotation queue, reconcile leftover WAL entries and start the
    /// rotation and rollback loops. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    #[instrument(skip(self), fields(mount = %self.config.mount_path))]
    pub async fn initialize(self: &Arc<Self>) -> BackendResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let queued = self.populate_queue().await?;
        if let Err(e) = self.rollback_root_wals(Duration::ZERO).await {
            warn!(error = %e, "root credential rollback at startup failed");
        }

        let rotation_tick = self.config.queue_tick_interval;
        self.spawn_periodic("static-rotation", rotation_tick, |backend| async move {
            backend.rotate_due_credentials().await;
        });
        let rollback_tick = self.config.rollback_tick_interval;
        self.spawn_periodic("wal-rollback", rollback_tick, |backend| async move {
            if let Err(e) = backend.rollback().await {
                warn!(error = %e, "WAL rollback failed");
            }
        });
        info!(queued, "database secrets engine initialized");
        Ok(())
    }

    /// Run `tick` every `period` until shutdown or until the engine is
    /// dropped. The task only holds a weak reference between ticks.
    fn spawn_periodic<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.shutdown.spawn(name, async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(backend) = weak.upgrade() else {
                    break;
                };
                tick(backend).await;
            }
        });
    }

    /// Stop the background loops and close every plugin. The engine rejects
    /// plugin work afterwards.
    #[instrument(skip(self), fields(mount = %self.config.mount_path))]
    pub async fn clean(&self) {
        self.shutdown.shutdown(self.config.shutdown_timeout).await;
        self.connections.close().await;
        info!("database secrets engine stopped");
    }

    /// Handle one request. Validation failures come back as error
    /// responses; everything else that fails is returned as an error.
    /// Reads of missing entries return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown paths, unsupported operations, access
    /// denials and plugin or storage failures.
    #[instrument(skip(self, req), fields(path = %req.path, operation = req.operation.as_str()))]
    pub async fn handle_request(&self, req: Request) -> BackendResult<Option<Response>> {
        let Some((endpoint, captures)) = self.router.route(&req.path) else {
            return Err(SdkError::UnsupportedPath(req.path).into());
        };
        match self.dispatch(endpoint, &req, &captures).await {
            Err(e) if e.is_user_error() => {
                debug!(error = %e, "request rejected");
                Ok(Some(Response::error_response(e.to_string())))
            }
            other => other,
        }
    }

    /// Prometheus text exposition of the engine's metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn metrics_text(&self) -> BackendResult<String> {
        self.metrics.render()
    }

    /// Id of the live plugin instance for `name`, if any.
    #[must_use]
    pub fn connection_id(&self, name: &str) -> Option<String> {
        self.connections
            .get(name)
            .ok()
            .flatten()
            .map(|instance| instance.id().to_string())
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The live plugin instance for `name`, creating and initializing it
    /// when none exists. Concurrent callers for the same name all receive
    /// the same instance.
    ///
    /// # Errors
    ///
    /// Fails when the connection is unknown, the plugin cannot start or
    /// Initialize fails.
    pub async fn get_connection(&self, name: &str) -> BackendResult<Arc<DatabaseInstance>> {
        if let Some(instance) = self.connections.get(name)? {
            return Ok(instance);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(instance) = self.connections.get(name)? {
            return Ok(instance);
        }
        let config = self.store.connection(name).await?.ok_or_else(|| {
            BackendError::invalid_request(format!("failed to find entry for connection with name: {name:?}"))
        })?;
        let (instance, _) = self.build_instance(&config, true).await?;

        match self.connections.put_if_empty(Arc::clone(&instance))? {
            Some(existing) => {
                warn!(connection = name, "lost race creating plugin instance, closing the new one");
                instance.close().await;
                Ok(existing)
            }
            None => {
                info!(
                    connection = name,
                    plugin = instance.plugin_name(),
                    version = instance.plugin_version(),
                    instance = instance.id(),
                    "plugin instance created"
                );
                Ok(instance)
            }
        }
    }

    /// Start and initialize a plugin for `config`. Returns the instance and
    /// the connection details the plugin asked to persist. The instance is
    /// not cached.
    pub(crate) async fn build_instance(
        &self,
        config: &ConnectionConfig,
        verify_connection: bool,
    ) -> BackendResult<(Arc<DatabaseInstance>, Map<String, Value>)> {
        let version = running_plugin_version(self.system.as_ref(), &config.plugin_name, &config.plugin_version).await?;
        let middleware = Middleware::new(
            config.plugin_name.clone(),
            Some(self.metrics.plugin.clone()),
            sanitizer_for(&config.connection_details),
        );
        let wrapper =
            DatabaseVersionWrapper::new(self.catalog.as_ref(), &config.plugin_name, &version, middleware).await?;
        let details = match wrapper
            .initialize(InitializeRequest {
                config: config.connection_details.clone(),
                verify_connection,
            })
            .await
        {
            Ok(details) => details,
            Err(e) => {
                if let Err(close_err) = wrapper.close().await {
                    debug!(error = %close_err, "closing plugin after failed initialize");
                }
                return Err(e);
            }
        };
        let instance = DatabaseInstance::new(config.name.clone(), config.plugin_name.clone(), version, wrapper);
        Ok((Arc::new(instance), details))
    }
}

/// Error sanitizer scrubbing the secret values of `details`.
fn sanitizer_for(details: &Map<String, Value>) -> ErrorSanitizer {
    ErrorSanitizer::with_secrets(
        SANITIZED_DETAIL_KEYS
            .iter()
            .filter_map(|key| details.get(*key).and_then(Value::as_str))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbplugin::PluginError;
    use serde_json::json;

    #[test]
    fn test_sanitizer_scrubs_root_password() {
        let details = json!({"username": "root", "password": "hunter2", "connection_url": ""});
        let sanitizer = sanitizer_for(details.as_object().unwrap());
        let err = sanitizer.sanitize(PluginError::database("auth failed for root with hunter2"));
        assert_eq!(err.to_string(), "auth failed for root with *****");
    }
}
