//! Shared test utilities for the database secrets engine.
//!
//! This crate provides:
//! - In-memory v5 and v4 database plugins over a shared mock server
//! - A mock host implementing the plugin catalog and system view
//! - An event recorder and a manually advanced clock
//! - Proptest generators and request fixtures

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod fixtures;
pub mod generators;
pub mod host;

pub use database::{MockDatabase, MockDatabaseV4, MockDatabaseV5, MockUser, V4Options};
pub use generators::*;
pub use host::{Generation, ManualClock, MockHost, RecordingEvents};

use rust_common::{init_tracing, TracingConfig};

/// Install a test-writer tracing subscriber once per test binary.
pub fn init_test_tracing() {
    let _ = init_tracing(
        &TracingConfig::default()
            .with_service_name("database-secrets-test")
            .with_log_level("debug")
            .with_test_writer(),
    );
}
