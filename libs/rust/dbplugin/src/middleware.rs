//! Plugin middleware: error sanitizing, metrics and trace logging around
//! every plugin method.

use crate::error::{PluginError, PluginResult};
use crate::v4::{DatabaseV4, StatementsV4, StaticUserConfig};
use crate::v5::{
    DatabaseV5, DeleteUserRequest, DeleteUserResponse, InitializeRequest, InitializeResponse, NewUserRequest,
    NewUserResponse, UpdateUserRequest, UpdateUserResponse, UsernameMetadata,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::{HistogramVec, IntCounterVec};
use rust_common::{MetricsRegistry, PlatformError};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Marker replacing secrets in error messages.
pub const REDACTED: &str = "*****";

/// Supplies `(secret, replacement)` pairs at the time an error is sanitized.
pub type SecretsFn = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

/// Scrubs secrets out of plugin errors.
#[derive(Clone)]
pub struct ErrorSanitizer {
    secrets: SecretsFn,
}

impl std::fmt::Debug for ErrorSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSanitizer").finish_non_exhaustive()
    }
}

impl Default for ErrorSanitizer {
    fn default() -> Self {
        Self::new(Arc::new(Vec::<(String, String)>::new))
    }
}

impl ErrorSanitizer {
    /// Sanitizer pulling secrets from `secrets`.
    #[must_use]
    pub fn new(secrets: SecretsFn) -> Self {
        Self { secrets }
    }

    /// Sanitizer for a fixed list of secrets, each replaced with [`REDACTED`].
    #[must_use]
    pub fn with_secrets<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pairs: Vec<(String, String)> = secrets
            .into_iter()
            .map(|s| (s.into(), REDACTED.to_string()))
            .collect();
        Self::new(Arc::new(move || pairs.clone()))
    }

    /// Sanitize `err`. URL parse failures collapse to
    /// [`PluginError::UrlParse`] since their message echoes the URL.
    #[must_use]
    pub fn sanitize(&self, err: PluginError) -> PluginError {
        if is_url_parse_error(&err.to_string()) {
            return PluginError::UrlParse;
        }
        let secrets = (self.secrets)();
        if secrets.is_empty() {
            return err;
        }
        err.map_message(|msg| {
            secrets
                .iter()
                .filter(|(secret, _)| !secret.is_empty())
                .fold(msg.to_string(), |acc, (secret, replacement)| acc.replace(secret, replacement))
        })
    }
}

fn is_url_parse_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("parse \"") || lower.contains("invalid connection url") || lower.contains("relative url without a base")
}

/// Prometheus metrics for plugin calls.
#[derive(Debug, Clone)]
pub struct PluginMetrics {
    requests_total: IntCounterVec,
    errors_total: IntCounterVec,
    duration_seconds: HistogramVec,
}

impl PluginMetrics {
    /// Register the plugin metrics in `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics are already registered.
    pub fn new(registry: &MetricsRegistry) -> Result<Self, PlatformError> {
        Ok(Self {
            requests_total: registry.counter_vec(
                "database_plugin_requests_total",
                "Total number of database plugin calls",
                &["plugin", "method"],
            )?,
            errors_total: registry.counter_vec(
                "database_plugin_errors_total",
                "Total number of failed database plugin calls",
                &["plugin", "method"],
            )?,
            duration_seconds: registry.histogram_vec(
                "database_plugin_request_duration_seconds",
                "Database plugin call latency in seconds",
                &["plugin", "method"],
            )?,
        })
    }

    /// Record one call.
    pub fn record(&self, plugin: &str, method: &str, elapsed: Duration, ok: bool) {
        self.requests_total.with_label_values(&[plugin, method]).inc();
        if !ok {
            self.errors_total.with_label_values(&[plugin, method]).inc();
        }
        self.duration_seconds
            .with_label_values(&[plugin, method])
            .observe(elapsed.as_secs_f64());
    }
}

/// Per-plugin middleware stack.
#[derive(Debug, Clone)]
pub struct Middleware {
    plugin: String,
    metrics: Option<PluginMetrics>,
    sanitizer: ErrorSanitizer,
}

impl Middleware {
    /// Middleware labelled with `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>, metrics: Option<PluginMetrics>, sanitizer: ErrorSanitizer) -> Self {
        Self {
            plugin: plugin.into(),
            metrics,
            sanitizer,
        }
    }

    /// Run one plugin call through tracing, metrics and sanitizing.
    pub async fn call<T, F>(&self, method: &'static str, fut: F) -> PluginResult<T>
    where
        F: Future<Output = PluginResult<T>> + Send,
    {
        trace!(plugin = %self.plugin, method, "plugin call started");
        let start = Instant::now();
        let result = fut.await;
        let elapsed = start.elapsed();
        trace!(
            plugin = %self.plugin,
            method,
            elapsed_ms = elapsed.as_millis(),
            ok = result.is_ok(),
            "plugin call finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record(&self.plugin, method, elapsed, result.is_ok());
        }
        result.map_err(|e| self.sanitizer.sanitize(e))
    }
}

/// A v5 plugin behind [`Middleware`].
#[derive(Debug)]
pub struct MiddlewareV5 {
    inner: Box<dyn DatabaseV5>,
    mw: Middleware,
}

impl MiddlewareV5 {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Box<dyn DatabaseV5>, mw: Middleware) -> Self {
        Self { inner, mw }
    }
}

#[async_trait]
impl DatabaseV5 for MiddlewareV5 {
    async fn initialize(&self, req: InitializeRequest) -> PluginResult<InitializeResponse> {
        self.mw.call("initialize", self.inner.initialize(req)).await
    }

    async fn new_user(&self, req: NewUserRequest) -> PluginResult<NewUserResponse> {
        self.mw.call("new_user", self.inner.new_user(req)).await
    }

    async fn update_user(&self, req: UpdateUserRequest) -> PluginResult<UpdateUserResponse> {
        self.mw.call("update_user", self.inner.update_user(req)).await
    }

    async fn delete_user(&self, req: DeleteUserRequest) -> PluginResult<DeleteUserResponse> {
        self.mw.call("delete_user", self.inner.delete_user(req)).await
    }

    async fn type_name(&self) -> PluginResult<String> {
        self.mw.call("type", self.inner.type_name()).await
    }

    async fn close(&self) -> PluginResult<()> {
        self.mw.call("close", self.inner.close()).await
    }
}

/// A v4 plugin behind [`Middleware`].
#[derive(Debug)]
pub struct MiddlewareV4 {
    inner: Box<dyn DatabaseV4>,
    mw: Middleware,
}

impl MiddlewareV4 {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Box<dyn DatabaseV4>, mw: Middleware) -> Self {
        Self { inner, mw }
    }
}

#[async_trait]
impl DatabaseV4 for MiddlewareV4 {
    async fn type_name(&self) -> PluginResult<String> {
        self.mw.call("type", self.inner.type_name()).await
    }

    async fn create_user(
        &self,
        statements: StatementsV4,
        username_config: UsernameMetadata,
        expiration: DateTime<Utc>,
    ) -> PluginResult<(String, String)> {
        self.mw
            .call("create_user", self.inner.create_user(statements, username_config, expiration))
            .await
    }

    async fn renew_user(
        &self,
        statements: StatementsV4,
        username: &str,
        expiration: DateTime<Utc>,
    ) -> PluginResult<()> {
        self.mw
            .call("renew_user", self.inner.renew_user(statements, username, expiration))
            .await
    }

    async fn revoke_user(&self, statements: StatementsV4, username: &str) -> PluginResult<()> {
        self.mw.call("revoke_user", self.inner.revoke_user(statements, username)).await
    }

    async fn rotate_root_credentials(&self, statements: Vec<String>) -> PluginResult<Map<String, Value>> {
        self.mw
            .call("rotate_root_credentials", self.inner.rotate_root_credentials(statements))
            .await
    }

    async fn init(&self, config: Map<String, Value>, verify_connection: bool) -> PluginResult<Map<String, Value>> {
        self.mw.call("init", self.inner.init(config, verify_connection)).await
    }

    async fn set_credentials(
        &self,
        statements: StatementsV4,
        static_user: StaticUserConfig,
    ) -> PluginResult<(String, String)> {
        self.mw
            .call("set_credentials", self.inner.set_credentials(statements, static_user))
            .await
    }

    async fn generate_credentials(&self) -> PluginResult<String> {
        self.mw.call("generate_credentials", self.inner.generate_credentials()).await
    }

    async fn close(&self) -> PluginResult<()> {
        self.mw.call("close", self.inner.close()).await
    }
}
