//! Mock host: plugin catalog, system view, event recorder and clock.

use crate::database::{MockDatabase, MockDatabaseV4, MockDatabaseV5, V4Options};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use credential_random::{parse_policy, PolicyResult, StringGenerator};
use dbplugin::{DatabaseV4, DatabaseV5, PluginCatalog, PluginError, PluginResult};
use parking_lot::{Mutex, RwLock};
use rust_common::Clock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use vault_sdk::{Event, EventSender, PluginVersion, RotationJob, SdkError, SdkResult, SystemView};

/// Plugin generation a mock registration speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Current protocol
    V5,
    /// Legacy protocol with the given capabilities
    V4(V4Options),
}

#[derive(Debug, Clone)]
struct Registration {
    name: String,
    version: String,
    builtin: bool,
    generation: Generation,
    db: MockDatabase,
}

/// In-memory host implementing [`PluginCatalog`] and [`SystemView`].
#[derive(Debug, Default)]
pub struct MockHost {
    plugins: RwLock<Vec<Registration>>,
    pins: RwLock<HashMap<String, String>>,
    policies: RwLock<HashMap<String, StringGenerator>>,
    jobs: RwLock<HashMap<String, RotationJob>>,
    dispensed: AtomicUsize,
    rotation_manager_down: AtomicBool,
}

impl MockHost {
    /// Empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a v5 plugin talking to `db`.
    pub fn register_v5(&self, name: &str, version: &str, db: &MockDatabase) {
        self.register(name, version, false, Generation::V5, db);
    }

    /// Register a builtin v5 plugin, e.g. version `v1.0.0+builtin`.
    pub fn register_builtin_v5(&self, name: &str, version: &str, db: &MockDatabase) {
        self.register(name, version, true, Generation::V5, db);
    }

    /// Register a v4 plugin talking to `db`.
    pub fn register_v4(&self, name: &str, version: &str, db: &MockDatabase, options: V4Options) {
        self.register(name, version, false, Generation::V4(options), db);
    }

    fn register(&self, name: &str, version: &str, builtin: bool, generation: Generation, db: &MockDatabase) {
        let mut plugins = self.plugins.write();
        plugins.retain(|p| !(p.name == name && p.version == version));
        plugins.push(Registration {
            name: name.to_string(),
            version: version.to_string(),
            builtin,
            generation,
            db: db.clone(),
        });
    }

    /// Pin `name` to `version`.
    pub fn pin_version(&self, name: &str, version: &str) {
        self.pins.write().insert(name.to_string(), version.to_string());
    }

    /// Add a password policy from HCL.
    ///
    /// # Errors
    ///
    /// Returns the parse error for an invalid policy.
    pub fn add_password_policy(&self, name: &str, hcl: &str) -> PolicyResult<()> {
        let policy = parse_policy(hcl)?;
        self.policies.write().insert(name.to_string(), policy);
        Ok(())
    }

    /// Registered rotation jobs.
    #[must_use]
    pub fn rotation_jobs(&self) -> Vec<RotationJob> {
        self.jobs.read().values().cloned().collect()
    }

    /// Make the rotation manager reject requests.
    pub fn set_rotation_manager_down(&self, down: bool) {
        self.rotation_manager_down.store(down, Ordering::SeqCst);
    }

    /// Number of plugin instances handed out.
    #[must_use]
    pub fn dispense_count(&self) -> usize {
        self.dispensed.load(Ordering::SeqCst)
    }

    fn lookup(&self, name: &str, version: &str) -> PluginResult<Registration> {
        let plugins = self.plugins.read();
        plugins
            .iter()
            .find(|p| p.name == name && p.version == version)
            .or_else(|| {
                // An empty version resolves to the builtin registration.
                if version.is_empty() {
                    plugins.iter().find(|p| p.name == name && p.builtin)
                } else {
                    None
                }
            })
            .cloned()
            .ok_or_else(|| PluginError::NotFound(format!("{name} {version}").trim().to_string()))
    }

    fn type_name(name: &str) -> String {
        name.trim_end_matches("-database-plugin").to_string()
    }
}

#[async_trait]
impl PluginCatalog for MockHost {
    async fn dispense_v5(&self, name: &str, version: &str) -> PluginResult<Box<dyn DatabaseV5>> {
        let reg = self.lookup(name, version)?;
        match reg.generation {
            Generation::V5 => {
                self.dispensed.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockDatabaseV5::new(Self::type_name(name), reg.db)))
            }
            Generation::V4(_) => Err(PluginError::VersionMismatch(format!("{name} speaks protocol 4"))),
        }
    }

    async fn dispense_v4(&self, name: &str, version: &str) -> PluginResult<Box<dyn DatabaseV4>> {
        let reg = self.lookup(name, version)?;
        match reg.generation {
            Generation::V4(options) => {
                self.dispensed.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockDatabaseV4::new(Self::type_name(name), reg.db, options)))
            }
            Generation::V5 => Err(PluginError::VersionMismatch(format!("{name} speaks protocol 5"))),
        }
    }
}

#[async_trait]
impl SystemView for MockHost {
    async fn generate_password_from_policy(&self, policy_name: &str) -> SdkResult<String> {
        let policy = self
            .policies
            .read()
            .get(policy_name)
            .cloned()
            .ok_or_else(|| SdkError::NotFound(format!("password policy {policy_name:?}")))?;
        Ok(policy.generate()?)
    }

    async fn pinned_plugin_version(&self, plugin_name: &str) -> SdkResult<Option<String>> {
        Ok(self.pins.read().get(plugin_name).cloned())
    }

    async fn list_plugin_versions(&self, plugin_name: &str) -> SdkResult<Vec<PluginVersion>> {
        Ok(self
            .plugins
            .read()
            .iter()
            .filter(|p| p.name == plugin_name)
            .map(|p| PluginVersion {
                name: p.name.clone(),
                version: p.version.clone(),
                builtin: p.builtin,
            })
            .collect())
    }

    async fn register_rotation_job(&self, job: RotationJob) -> SdkResult<String> {
        if self.rotation_manager_down.load(Ordering::SeqCst) {
            return Err(SdkError::Unavailable("rotation manager".to_string()));
        }
        let id = format!("{}{}", job.mount_point, job.path);
        self.jobs.write().insert(id.clone(), job);
        Ok(id)
    }

    async fn deregister_rotation_job(&self, mount_point: &str, path: &str) -> SdkResult<()> {
        if self.rotation_manager_down.load(Ordering::SeqCst) {
            return Err(SdkError::Unavailable("rotation manager".to_string()));
        }
        self.jobs.write().remove(&format!("{mount_point}{path}"));
        Ok(())
    }
}

/// Event sender that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Event types in emission order.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Events of one type.
    #[must_use]
    pub fn of_type(&self, event_type: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSender for RecordingEvents {
    fn send_event(&self, event: Event) -> SdkResult<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Clock advanced by hand.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock reading `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Clock reading `secs` after the Unix epoch.
    #[must_use]
    pub fn at_unix(secs: i64) -> Self {
        Self::new(Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        *self.now.lock() += by;
    }

    /// Set the clock.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_unix(1_700_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispense_respects_generation() {
        let host = MockHost::new();
        let db = MockDatabase::new("root", "pw");
        host.register_v4("hana-database-plugin", "", &db, V4Options::default());

        let err = host.dispense_v5("hana-database-plugin", "").await.unwrap_err();
        assert!(matches!(err, PluginError::VersionMismatch(_)));
        assert!(host.dispense_v4("hana-database-plugin", "").await.is_ok());
        assert_eq!(host.dispense_count(), 1);
        assert!(matches!(
            host.dispense_v4("mysql-database-plugin", "").await,
            Err(PluginError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_version_resolves_builtin() {
        let host = MockHost::new();
        let db = MockDatabase::new("root", "pw");
        host.register_builtin_v5("postgresql-database-plugin", "v1.0.0+builtin", &db);
        let plugin = host.dispense_v5("postgresql-database-plugin", "").await.unwrap();
        assert_eq!(plugin.type_name().await.unwrap(), "postgresql");
    }

    #[tokio::test]
    async fn test_password_policy() {
        let host = MockHost::new();
        host.add_password_policy(
            "digits",
            r#"
            length = 12
            rule "charset" {
              charset = "0123456789"
            }
            "#,
        )
        .unwrap();
        let pw = host.generate_password_from_policy("digits").await.unwrap();
        assert_eq!(pw.len(), 12);
        assert!(pw.chars().all(|c| c.is_ascii_digit()));
        assert!(host.generate_password_from_policy("missing").await.is_err());
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_unix(100);
        clock.advance(Duration::from_secs(65));
        assert_eq!(clock.now().timestamp(), 165);
    }
}
