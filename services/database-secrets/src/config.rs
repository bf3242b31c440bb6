//! Engine configuration.
//!
//! Loaded from `DB_SECRETS_*` environment variables (a `.env` file is read
//! first when present) and validated at construction.

use crate::error::BackendError;
use std::env;
use std::time::Duration;

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Mount path the engine is attached at, used in events and rotation jobs
    pub mount_path: String,
    /// How often the rotation worker drains due static roles
    pub queue_tick_interval: Duration,
    /// Delay before a failed static rotation is retried
    pub rotation_retry_interval: Duration,
    /// WAL entries younger than this are left alone by the rollback tick
    pub wal_rollback_min_age: Duration,
    /// How often pending root-rotation WAL entries are reconciled
    pub rollback_tick_interval: Duration,
    /// Deadline for the default password generator
    pub password_generation_timeout: Duration,
    /// Lease TTL used when a role sets none
    pub default_lease_ttl: Duration,
    /// Lease max TTL used when a role sets none
    pub max_lease_ttl: Duration,
    /// Number of per-role lock stripes
    pub role_lock_stripes: usize,
    /// How long `clean` waits for background tasks
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mount_path: "database/".to_string(),
            queue_tick_interval: Duration::from_secs(5),
            rotation_retry_interval: Duration::from_secs(10),
            wal_rollback_min_age: Duration::from_secs(60),
            rollback_tick_interval: Duration::from_secs(60),
            password_generation_timeout: Duration::from_secs(1),
            default_lease_ttl: Duration::from_secs(768 * 3600),
            max_lease_ttl: Duration::from_secs(768 * 3600),
            role_lock_stripes: 256,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, BackendError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let mount_path = env::var("DB_SECRETS_MOUNT_PATH").unwrap_or(defaults.mount_path);
        let config = Self {
            mount_path,
            queue_tick_interval: Duration::from_secs(parse_env("DB_SECRETS_QUEUE_TICK_SECONDS", 5)?),
            rotation_retry_interval: Duration::from_secs(parse_env("DB_SECRETS_ROTATION_RETRY_SECONDS", 10)?),
            wal_rollback_min_age: Duration::from_secs(parse_env("DB_SECRETS_WAL_MIN_AGE_SECONDS", 60)?),
            rollback_tick_interval: Duration::from_secs(parse_env("DB_SECRETS_ROLLBACK_TICK_SECONDS", 60)?),
            password_generation_timeout: Duration::from_millis(parse_env("DB_SECRETS_PASSWORD_TIMEOUT_MS", 1000)?),
            default_lease_ttl: Duration::from_secs(parse_env(
                "DB_SECRETS_DEFAULT_LEASE_TTL_SECONDS",
                defaults.default_lease_ttl.as_secs(),
            )?),
            max_lease_ttl: Duration::from_secs(parse_env(
                "DB_SECRETS_MAX_LEASE_TTL_SECONDS",
                defaults.max_lease_ttl.as_secs(),
            )?),
            role_lock_stripes: defaults.role_lock_stripes,
            shutdown_timeout: defaults.shutdown_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] naming the first bad value.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.queue_tick_interval.is_zero() {
            return Err(BackendError::config("queue_tick_interval must be positive"));
        }
        if self.rollback_tick_interval.is_zero() {
            return Err(BackendError::config("rollback_tick_interval must be positive"));
        }
        if self.password_generation_timeout.is_zero() {
            return Err(BackendError::config("password_generation_timeout must be positive"));
        }
        if self.role_lock_stripes == 0 {
            return Err(BackendError::config("role_lock_stripes must be positive"));
        }
        if self.max_lease_ttl < self.default_lease_ttl {
            return Err(BackendError::config("max_lease_ttl must not be less than default_lease_ttl"));
        }
        Ok(())
    }

    /// Set the mount path.
    #[must_use]
    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = mount_path.into();
        self
    }

    /// Set the rotation worker tick.
    #[must_use]
    pub const fn with_queue_tick_interval(mut self, interval: Duration) -> Self {
        self.queue_tick_interval = interval;
        self
    }

    /// Set the retry delay after a failed static rotation.
    #[must_use]
    pub const fn with_rotation_retry_interval(mut self, interval: Duration) -> Self {
        self.rotation_retry_interval = interval;
        self
    }

    /// Set the WAL minimum age.
    #[must_use]
    pub const fn with_wal_rollback_min_age(mut self, age: Duration) -> Self {
        self.wal_rollback_min_age = age;
        self
    }

    /// Set the rollback tick.
    #[must_use]
    pub const fn with_rollback_tick_interval(mut self, interval: Duration) -> Self {
        self.rollback_tick_interval = interval;
        self
    }

    /// Set the password generation deadline.
    #[must_use]
    pub const fn with_password_generation_timeout(mut self, timeout: Duration) -> Self {
        self.password_generation_timeout = timeout;
        self
    }

    /// Set the fallback lease TTLs.
    #[must_use]
    pub const fn with_lease_ttls(mut self, default_ttl: Duration, max_ttl: Duration) -> Self {
        self.default_lease_ttl = default_ttl;
        self.max_lease_ttl = max_ttl;
        self
    }
}

/// Parse environment variable with default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, BackendError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|e| BackendError::config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_tick_interval, Duration::from_secs(5));
        assert_eq!(config.rotation_retry_interval, Duration::from_secs(10));
        assert_eq!(config.role_lock_stripes, 256);
    }

    #[test]
    fn test_builder_overrides() {
        let config = EngineConfig::default()
            .with_mount_path("db-prod/")
            .with_queue_tick_interval(Duration::from_secs(1))
            .with_wal_rollback_min_age(Duration::ZERO)
            .with_rotation_retry_interval(Duration::from_secs(30))
            .with_password_generation_timeout(Duration::from_millis(500));
        assert_eq!(config.mount_path, "db-prod/");
        assert_eq!(config.rotation_retry_interval, Duration::from_secs(30));
        assert_eq!(config.password_generation_timeout, Duration::from_millis(500));
        assert_eq!(config.queue_tick_interval, Duration::from_secs(1));
        assert!(config.wal_rollback_min_age.is_zero());
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let config = EngineConfig::default().with_queue_tick_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(BackendError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_lease_ttls() {
        let config =
            EngineConfig::default().with_lease_ttls(Duration::from_secs(7200), Duration::from_secs(3600));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_reports_variable() {
        let err = parse_env::<u64>("PATH", 1).unwrap_err();
        assert!(err.to_string().contains("Invalid PATH"));
        assert_eq!(parse_env::<u64>("DB_SECRETS_TEST_UNSET_VARIABLE", 7).unwrap(), 7);
    }
}
