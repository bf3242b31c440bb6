//! Prometheus metrics helpers.
//!
//! Each engine instance owns its own [`MetricsRegistry`]; nothing is
//! registered in the process-wide default registry, so two mounts of the
//! engine in one process never collide on metric names.

use crate::PlatformError;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Default latency buckets in seconds, tuned for plugin RPCs.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// A prometheus registry scoped to a single component instance.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    registry: Registry,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("families", &self.registry.gather().len())
            .finish()
    }
}

impl MetricsRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a labelled counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already registered.
    pub fn counter_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntCounterVec, PlatformError> {
        let counter = IntCounterVec::new(Opts::new(name, help), labels).map_err(internal)?;
        self.registry
            .register(Box::new(counter.clone()))
            .map_err(internal)?;
        Ok(counter)
    }

    /// Register a labelled latency histogram using [`LATENCY_BUCKETS`].
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already registered.
    pub fn histogram_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<HistogramVec, PlatformError> {
        let opts = HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS.to_vec());
        let histogram = HistogramVec::new(opts, labels).map_err(internal)?;
        self.registry
            .register(Box::new(histogram.clone()))
            .map_err(internal)?;
        Ok(histogram)
    }

    /// Register an unlabelled gauge.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already registered.
    pub fn int_gauge(&self, name: &str, help: &str) -> Result<IntGauge, PlatformError> {
        let gauge = IntGauge::new(name, help).map_err(internal)?;
        self.registry
            .register(Box::new(gauge.clone()))
            .map_err(internal)?;
        Ok(gauge)
    }

    /// Render every registered family in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String, PlatformError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(internal)?;
        String::from_utf8(buffer).map_err(|e| PlatformError::Internal(e.to_string()))
    }
}

fn internal(err: prometheus::Error) -> PlatformError {
    PlatformError::Internal(format!("metrics: {err}"))
}
