//! Plugin catalog: dispenses plugin handles by name and version.

use crate::error::{PluginError, PluginResult};
use crate::grpc::{GrpcDatabaseV4, GrpcDatabaseV5};
use crate::runner::{PluginCommand, PluginProcess, PluginRunner};
use crate::v4::DatabaseV4;
use crate::v5::DatabaseV5;
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tonic::transport::Channel;
use tracing::{debug, instrument};

/// Application protocol version of the v4 interface.
pub const V4_PROTOCOL: u32 = 4;
/// Application protocol version of the v5 interface.
pub const V5_PROTOCOL: u32 = 5;

/// Source of plugin handles.
///
/// `dispense_v5` fails with `PluginError::VersionMismatch` when the named
/// plugin only speaks v4.
#[async_trait]
pub trait PluginCatalog: Send + Sync + std::fmt::Debug {
    /// Start (or attach to) a v5 plugin.
    async fn dispense_v5(&self, name: &str, version: &str) -> PluginResult<Box<dyn DatabaseV5>>;

    /// Start (or attach to) a v4 plugin.
    async fn dispense_v4(&self, name: &str, version: &str) -> PluginResult<Box<dyn DatabaseV4>>;
}

/// Catalog of plugin executables started on demand.
#[derive(Debug, Default)]
pub struct ProcessCatalog {
    plugins: RwLock<Vec<PluginCommand>>,
    runner: PluginRunner,
}

impl ProcessCatalog {
    /// Empty catalog using `runner`.
    #[must_use]
    pub fn new(runner: PluginRunner) -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            runner,
        }
    }

    /// Register a plugin, replacing any entry with the same name and version.
    pub fn register(&self, cmd: PluginCommand) {
        let mut plugins = self.plugins.write();
        plugins.retain(|p| !(p.name == cmd.name && p.version == cmd.version));
        plugins.push(cmd);
    }

    /// Remove a registration.
    pub fn deregister(&self, name: &str, version: &str) -> bool {
        let mut plugins = self.plugins.write();
        let before = plugins.len();
        plugins.retain(|p| !(p.name == name && p.version == version));
        plugins.len() != before
    }

    /// Registered versions of `name`.
    #[must_use]
    pub fn versions(&self, name: &str) -> Vec<String> {
        self.plugins
            .read()
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.version.clone())
            .collect()
    }

    /// Find the command for `name`: an exact version match, or when
    /// `version` is empty the unversioned entry, else the highest semver.
    fn lookup(&self, name: &str, version: &str) -> PluginResult<PluginCommand> {
        let plugins = self.plugins.read();
        let candidates = plugins.iter().filter(|p| p.name == name);
        let found = if version.is_empty() {
            let all: Vec<&PluginCommand> = candidates.collect();
            all.iter()
                .find(|p| p.version.is_empty())
                .or_else(|| {
                    all.iter()
                        .filter_map(|p| {
                            semver::Version::parse(p.version.trim_start_matches('v'))
                                .ok()
                                .map(|v| (v, p))
                        })
                        .max_by(|a, b| a.0.cmp(&b.0))
                        .map(|(_, p)| p)
                })
                .map(|p| (*p).clone())
        } else {
            candidates.into_iter().find(|p| p.version == version).cloned()
        };
        found.ok_or_else(|| {
            PluginError::NotFound(if version.is_empty() {
                name.to_string()
            } else {
                format!("{name} version {version}")
            })
        })
    }

    async fn start(&self, name: &str, version: &str, app_version: u32) -> PluginResult<(Channel, PluginProcess)> {
        let cmd = self.lookup(name, version)?;
        verify_checksum(&cmd).await?;
        self.runner.start(&cmd, app_version).await
    }
}

/// Compare the executable against its registered SHA-256.
async fn verify_checksum(cmd: &PluginCommand) -> PluginResult<()> {
    let Some(expected) = &cmd.sha256 else {
        return Ok(());
    };
    let binary = tokio::fs::read(&cmd.command)
        .await
        .map_err(|e| PluginError::Spawn(format!("{}: {e}", cmd.command.display())))?;
    let actual = hex::encode(Sha256::digest(&binary));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(PluginError::ChecksumMismatch(cmd.name.clone()));
    }
    debug!(plugin = %cmd.name, "plugin checksum verified");
    Ok(())
}

#[async_trait]
impl PluginCatalog for ProcessCatalog {
    #[instrument(skip(self))]
    async fn dispense_v5(&self, name: &str, version: &str) -> PluginResult<Box<dyn DatabaseV5>> {
        let (channel, process) = self.start(name, version, V5_PROTOCOL).await?;
        Ok(Box::new(GrpcDatabaseV5::new(channel, Some(process))))
    }

    #[instrument(skip(self))]
    async fn dispense_v4(&self, name: &str, version: &str) -> PluginResult<Box<dyn DatabaseV4>> {
        let (channel, process) = self.start(name, version, V4_PROTOCOL).await?;
        Ok(Box::new(GrpcDatabaseV4::new(channel, Some(process))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ProcessCatalog {
        let catalog = ProcessCatalog::default();
        catalog.register(PluginCommand::new("postgresql-database-plugin", "v1.2.0", "/opt/pg-1.2.0"));
        catalog.register(PluginCommand::new("postgresql-database-plugin", "v1.10.0", "/opt/pg-1.10.0"));
        catalog.register(PluginCommand::new("hana-database-plugin", "", "/opt/hana"));
        catalog
    }

    #[test]
    fn test_lookup_prefers_exact_version() {
        let cmd = catalog().lookup("postgresql-database-plugin", "v1.2.0").unwrap();
        assert_eq!(cmd.command.to_str(), Some("/opt/pg-1.2.0"));
    }

    #[test]
    fn test_lookup_picks_highest_semver() {
        let cmd = catalog().lookup("postgresql-database-plugin", "").unwrap();
        assert_eq!(cmd.version, "v1.10.0");
    }

    #[test]
    fn test_lookup_unversioned_and_missing() {
        let catalog = catalog();
        assert_eq!(catalog.lookup("hana-database-plugin", "").unwrap().version, "");
        assert!(matches!(
            catalog.lookup("mysql-database-plugin", ""),
            Err(PluginError::NotFound(_))
        ));
        assert!(matches!(
            catalog.lookup("postgresql-database-plugin", "v9.9.9"),
            Err(PluginError::NotFound(_))
        ));
    }

    #[test]
    fn test_register_replaces_same_version() {
        let catalog = catalog();
        catalog.register(PluginCommand::new("hana-database-plugin", "", "/usr/local/hana"));
        assert_eq!(catalog.versions("hana-database-plugin").len(), 1);
        assert!(catalog.deregister("hana-database-plugin", ""));
        assert!(catalog.versions("hana-database-plugin").is_empty());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_prevents_start() {
        let path = std::env::temp_dir().join(format!("dbplugin-checksum-{}", std::process::id()));
        tokio::fs::write(&path, b"#!/bin/sh\n").await.unwrap();
        let catalog = ProcessCatalog::default();
        catalog.register(PluginCommand::new("tampered", "", &path).with_sha256("00".repeat(32)));

        let err = catalog.dispense_v5("tampered", "").await.unwrap_err();
        assert!(matches!(err, PluginError::ChecksumMismatch(_)));
        let _ = tokio::fs::remove_file(&path).await;
    }
}
