//! Prometheus metrics for the database secrets engine.
//!
//! Registered in the engine's own registry so several mounts can coexist in
//! one process.

use crate::error::BackendResult;
use dbplugin::PluginMetrics;
use prometheus::{IntCounterVec, IntGauge};
use rust_common::MetricsRegistry;

/// Engine counters and gauges.
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    registry: MetricsRegistry,
    /// Live plugin instances
    pub connections: IntGauge,
    /// Static role rotations by outcome
    pub static_rotations: IntCounterVec,
    /// Dynamic credentials issued by credential type
    pub credentials_issued: IntCounterVec,
    /// Plugin call metrics shared by every instance's middleware
    pub plugin: PluginMetrics,
}

impl EngineMetrics {
    /// Register every engine metric in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails.
    pub fn new() -> BackendResult<Self> {
        let registry = MetricsRegistry::new();
        Ok(Self {
            connections: registry.int_gauge("database_connections", "Number of live database plugin instances")?,
            static_rotations: registry.counter_vec(
                "database_static_rotations_total",
                "Total number of static role rotations",
                &["outcome"],
            )?,
            credentials_issued: registry.counter_vec(
                "database_credentials_issued_total",
                "Total number of dynamic credentials issued",
                &["credential_type"],
            )?,
            plugin: PluginMetrics::new(&registry)?,
            registry,
        })
    }

    /// Record a static rotation outcome (`success`, `retry` or `failure`).
    pub fn record_rotation(&self, outcome: &str) {
        self.static_rotations.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition of every engine metric.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> BackendResult<String> {
        Ok(self.registry.render()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_engine_families() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_rotation("success");
        metrics.credentials_issued.with_label_values(&["password"]).inc();
        metrics.connections.set(2);

        let text = metrics.render().unwrap();
        assert!(text.contains("database_static_rotations_total{outcome=\"success\"} 1"));
        assert!(text.contains("database_credentials_issued_total{credential_type=\"password\"} 1"));
        assert!(text.contains("database_connections 2"));
    }

    #[test]
    fn test_instances_do_not_collide() {
        assert!(EngineMetrics::new().is_ok());
        assert!(EngineMetrics::new().is_ok());
    }
}
