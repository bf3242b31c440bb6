//! Shared harness for the engine integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use database_secrets::{BackendResult, DatabaseBackend, EngineConfig};
use rust_common::Clock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use test_utils::fixtures::{ROOT_PASSWORD, ROOT_USERNAME};
use test_utils::{init_test_tracing, ManualClock, MockDatabase, MockHost, RecordingEvents};
use vault_sdk::{InmemStorage, Operation, Request, Response};

/// An engine wired to in-memory collaborators.
pub struct Harness {
    pub backend: Arc<DatabaseBackend>,
    pub host: Arc<MockHost>,
    pub events: Arc<RecordingEvents>,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<InmemStorage>,
    pub db: MockDatabase,
    pub config: EngineConfig,
}

/// Engine config whose background loops never fire during a test.
pub fn quiet_config() -> EngineConfig {
    EngineConfig::default()
        .with_queue_tick_interval(Duration::from_secs(3600))
        .with_rollback_tick_interval(Duration::from_secs(3600))
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(quiet_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_test_tracing();
        let host = Arc::new(MockHost::new());
        let db = MockDatabase::new(ROOT_USERNAME, ROOT_PASSWORD);
        let clock = Arc::new(ManualClock::default());
        let storage = Arc::new(InmemStorage::new());
        let events = Arc::new(RecordingEvents::new());
        let backend = DatabaseBackend::new(
            config.clone(),
            storage.clone(),
            host.clone(),
            host.clone(),
            events.clone(),
            clock.clone(),
        )
        .unwrap();
        Self {
            backend,
            host,
            events,
            clock,
            storage,
            db,
            config,
        }
    }

    /// Stop the current engine and start a new one over the same storage,
    /// host and clock.
    pub async fn restart(&mut self) {
        self.backend.clean().await;
        self.backend = DatabaseBackend::new(
            self.config.clone(),
            self.storage.clone(),
            self.host.clone(),
            self.host.clone(),
            self.events.clone(),
            self.clock.clone(),
        )
        .unwrap();
        self.backend.initialize().await.unwrap();
    }

    pub async fn request(&self, operation: Operation, path: &str, body: Value) -> BackendResult<Option<Response>> {
        self.backend
            .handle_request(Request::new(operation, path).with_data(body).with_mount_point("database/"))
            .await
    }

    /// Write that must succeed without an error response.
    pub async fn write(&self, path: &str, body: Value) -> Option<Response> {
        let resp = self.request(Operation::Update, path, body).await.unwrap();
        if let Some(r) = &resp {
            assert!(!r.is_error(), "write to {path} failed: {:?}", r.error());
        }
        resp
    }

    /// Read that must succeed without an error response.
    pub async fn read(&self, path: &str) -> Option<Response> {
        let resp = self.request(Operation::Read, path, Value::Null).await.unwrap();
        if let Some(r) = &resp {
            assert!(!r.is_error(), "read of {path} failed: {:?}", r.error());
        }
        resp
    }

    /// Current engine time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current password of static role `name`.
    pub async fn static_password(&self, name: &str) -> String {
        let resp = self.read(&format!("static-creds/{name}")).await.unwrap();
        resp.get("password").and_then(Value::as_str).unwrap().to_string()
    }
}
