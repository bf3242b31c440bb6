//! Host services available to an engine beyond storage.

use crate::error::SdkResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A registered plugin binary as reported by the host catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVersion {
    /// Plugin name
    pub name: String,
    /// Semantic version, possibly with a `+builtin` suffix
    pub version: String,
    /// Whether the plugin is compiled into the host
    pub builtin: bool,
}

/// Cadence of an automated rotation job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RotationSchedule {
    /// Fixed period between rotations
    pub period: Option<Duration>,
    /// Cron expression
    pub schedule: Option<String>,
    /// How long after a scheduled time a rotation may still run
    pub window: Option<Duration>,
}

impl RotationSchedule {
    /// Whether neither a period nor a schedule is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.period.is_none() && self.schedule.is_none()
    }
}

/// A request to the host rotation manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationJob {
    /// Mount the job belongs to
    pub mount_point: String,
    /// Engine path invoked when the job fires
    pub path: String,
    /// Cadence
    pub schedule: RotationSchedule,
}

/// Host services exposed to an engine.
#[async_trait]
pub trait SystemView: Send + Sync + std::fmt::Debug {
    /// Generate a password from a named host password policy.
    async fn generate_password_from_policy(&self, policy_name: &str) -> SdkResult<String>;

    /// Version pinned for a plugin name, if any.
    async fn pinned_plugin_version(&self, plugin_name: &str) -> SdkResult<Option<String>>;

    /// Every registered version of a plugin.
    async fn list_plugin_versions(&self, plugin_name: &str) -> SdkResult<Vec<PluginVersion>>;

    /// Register an automated rotation job; returns the job id.
    async fn register_rotation_job(&self, job: RotationJob) -> SdkResult<String>;

    /// Remove the job registered for `path` under `mount_point`.
    async fn deregister_rotation_job(&self, mount_point: &str, path: &str) -> SdkResult<()>;
}
