//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; whoever embeds it decides whether
//! and how they are rendered.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Environment variable selecting `json` or `text` output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name recorded on startup
    pub service_name: String,
    /// Log level filter, overridden by `RUST_LOG`
    pub log_level: String,
    /// Whether to output JSON format
    pub json_output: bool,
    /// Route output through the libtest capture writer
    pub test_writer: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "database-secrets".to_string(),
            log_level: "info".to_string(),
            json_output: false,
            test_writer: false,
        }
    }
}

impl TracingConfig {
    /// Set the service name.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable JSON output.
    #[must_use]
    pub const fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    /// Write through the test harness so output is captured per test.
    #[must_use]
    pub const fn with_test_writer(mut self) -> Self {
        self.test_writer = true;
        self
    }
}

impl TracingConfig {
    /// Defaults with the output format taken from [`LOG_FORMAT_ENV`].
    #[must_use]
    pub fn from_env() -> Self {
        let json_output = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
        Self {
            json_output,
            ..Self::default()
        }
    }
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed, which is expected
/// when several tests in one binary race to initialize tracing.
pub fn init_tracing(config: &TracingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt = tracing_subscriber::fmt::layer().with_target(true);
    let output: Box<dyn Layer<Registry> + Send + Sync> = if config.json_output {
        fmt.json().with_current_span(true).boxed()
    } else if config.test_writer {
        fmt.with_test_writer().boxed()
    } else {
        fmt.boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(service = %config.service_name, json = config.json_output, "tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "database-secrets");
        assert_eq!(config.log_level, "info");
        assert!(!config.json_output);
        assert!(!config.test_writer);
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::default()
            .with_service_name("db-engine")
            .with_log_level("trace")
            .with_json_output()
            .with_test_writer();

        assert_eq!(config.service_name, "db-engine");
        assert_eq!(config.log_level, "trace");
        assert!(config.json_output);
        assert!(config.test_writer);
    }

    #[test]
    fn test_second_init_is_noop() {
        let config = TracingConfig::default().with_test_writer();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
