//! Persisted entities: connection configs, dynamic roles and static roles.

use crate::error::{BackendError, BackendResult};
use chrono::{DateTime, Utc};
use dbplugin::CredentialType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;
use vault_sdk::RotationSchedule;

/// Smallest allowed `rotation_window`.
pub const MIN_ROTATION_WINDOW: Duration = Duration::from_secs(3600);
/// Smallest allowed static `rotation_period`.
pub const MIN_ROTATION_PERIOD: Duration = Duration::from_secs(5);

const fn default_true() -> bool {
    true
}

/// A named binding to a database plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection name
    pub name: String,
    /// Catalog name of the plugin
    pub plugin_name: String,
    /// Plugin version; empty selects the builtin or unversioned plugin
    #[serde(default)]
    pub plugin_version: String,
    /// Role-name globs allowed to use this connection
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Opaque plugin configuration, including root credentials
    #[serde(default)]
    pub connection_details: Map<String, Value>,
    /// Whether Initialize must prove the credentials work
    #[serde(default = "default_true")]
    pub verify_connection: bool,
    /// Host password policy for generated passwords
    #[serde(default)]
    pub password_policy: String,
    /// Statements used when rotating the root account
    #[serde(default)]
    pub root_rotation_statements: Vec<String>,
    /// Automated root rotation period in seconds
    #[serde(default)]
    pub rotation_period: Option<u64>,
    /// Automated root rotation cron schedule
    #[serde(default)]
    pub rotation_schedule: Option<String>,
    /// Window after a scheduled root rotation, in seconds
    #[serde(default)]
    pub rotation_window: Option<u64>,
    /// Whether automated root rotation is switched off
    #[serde(default)]
    pub disable_automated_rotation: bool,
    /// Whether new static roles skip their initial rotation by default
    #[serde(default)]
    pub skip_static_role_import_rotation: bool,
}

impl ConnectionConfig {
    /// A config for `plugin_name` with every optional field at its default.
    #[must_use]
    pub fn new(name: impl Into<String>, plugin_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_name: plugin_name.into(),
            plugin_version: String::new(),
            allowed_roles: Vec::new(),
            connection_details: Map::new(),
            verify_connection: true,
            password_policy: String::new(),
            root_rotation_statements: Vec::new(),
            rotation_period: None,
            rotation_schedule: None,
            rotation_window: None,
            disable_automated_rotation: false,
            skip_static_role_import_rotation: false,
        }
    }

    /// Whether `role` matches one of the allowed-role globs.
    #[must_use]
    pub fn is_role_allowed(&self, role: &str) -> bool {
        self.allowed_roles.iter().any(|pattern| glob_match(pattern, role))
    }

    /// Root account name from the connection details.
    #[must_use]
    pub fn root_username(&self) -> Option<&str> {
        self.detail_str("username")
    }

    /// Root account password from the connection details.
    #[must_use]
    pub fn root_password(&self) -> Option<&str> {
        self.detail_str("password")
    }

    fn detail_str(&self, key: &str) -> Option<&str> {
        self.connection_details
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Cadence of automated root rotation, empty when none is configured.
    #[must_use]
    pub fn root_rotation_schedule(&self) -> RotationSchedule {
        RotationSchedule {
            period: self.rotation_period.map(Duration::from_secs),
            schedule: self.rotation_schedule.clone(),
            window: self.rotation_window.map(Duration::from_secs),
        }
    }

    /// Whether a rotation job should be registered for this connection.
    #[must_use]
    pub fn wants_automated_rotation(&self) -> bool {
        !self.disable_automated_rotation && !self.root_rotation_schedule().is_empty()
    }
}

/// A role issuing short-lived database users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Connection the role issues credentials on
    pub db_name: String,
    /// Statements creating the user
    pub creation_statements: Vec<String>,
    /// Statements dropping the user
    #[serde(default)]
    pub revocation_statements: Vec<String>,
    /// Statements undoing a partial creation
    #[serde(default)]
    pub rollback_statements: Vec<String>,
    /// Statements extending the user's expiry
    #[serde(default)]
    pub renew_statements: Vec<String>,
    /// Lease TTL in seconds; zero uses the engine default
    #[serde(default)]
    pub default_ttl: u64,
    /// Lease max TTL in seconds; zero uses the engine default
    #[serde(default)]
    pub max_ttl: u64,
    /// Kind of credential issued
    #[serde(default)]
    pub credential_type: CredentialType,
    /// Generator settings for the credential type
    #[serde(default)]
    pub credential_config: Map<String, Value>,
}

impl Role {
    /// Lease TTL, falling back to `fallback` when unset.
    #[must_use]
    pub const fn default_ttl_or(&self, fallback: Duration) -> Duration {
        if self.default_ttl == 0 {
            fallback
        } else {
            Duration::from_secs(self.default_ttl)
        }
    }

    /// Lease max TTL, falling back to `fallback` when unset.
    #[must_use]
    pub const fn max_ttl_or(&self, fallback: Duration) -> Duration {
        if self.max_ttl == 0 {
            fallback
        } else {
            Duration::from_secs(self.max_ttl)
        }
    }
}

/// A pre-existing database account whose password the engine rotates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticRole {
    /// Role name
    pub name: String,
    /// Connection the account lives on
    pub db_name: String,
    /// Database account name, fixed at creation
    pub username: String,
    /// Statements setting the new password
    #[serde(default)]
    pub rotation_statements: Vec<String>,
    /// Kind of credential managed
    #[serde(default)]
    pub credential_type: CredentialType,
    /// Generator settings for the credential type
    #[serde(default)]
    pub credential_config: Map<String, Value>,
    /// Rotation period in seconds
    #[serde(default)]
    pub rotation_period: Option<u64>,
    /// Cron rotation schedule
    #[serde(default)]
    pub rotation_schedule: Option<String>,
    /// Seconds after a scheduled time during which rotation may still run
    #[serde(default)]
    pub rotation_window: Option<u64>,
    /// Current password
    #[serde(default)]
    pub password: Option<String>,
    /// Current private key (PEM) for key-pair credentials
    #[serde(default)]
    pub private_key: Option<String>,
    /// When the engine last rotated the account
    #[serde(default)]
    pub last_vault_rotation: Option<DateTime<Utc>>,
    /// When the next rotation is due
    #[serde(default)]
    pub next_vault_rotation: Option<DateTime<Utc>>,
}

/// How often a static role rotates.
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fixed period after the last rotation
    Period(Duration),
    /// Cron schedule with an optional window
    Schedule {
        /// Parsed schedule
        schedule: Box<cron::Schedule>,
        /// How long after a scheduled time rotation may still run
        window: Option<Duration>,
    },
}

impl Cadence {
    /// Next rotation time strictly after `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule has no future occurrence.
    pub fn next_after(&self, from: DateTime<Utc>) -> BackendResult<DateTime<Utc>> {
        match self {
            Self::Period(period) => chrono::Duration::from_std(*period)
                .map(|p| from + p)
                .map_err(|e| BackendError::invalid_request(format!("invalid rotation_period: {e}"))),
            Self::Schedule { schedule, .. } => schedule
                .after(&from)
                .next()
                .ok_or_else(|| BackendError::invalid_request("rotation_schedule has no future occurrence")),
        }
    }
}

impl StaticRole {
    /// Parsed rotation cadence.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless exactly one of period and schedule
    /// is set and it is well formed.
    pub fn cadence(&self) -> BackendResult<Cadence> {
        match (self.rotation_period, self.rotation_schedule.as_deref()) {
            (Some(_), Some(_)) => Err(BackendError::invalid_request(
                "mutually exclusive fields rotation_period and rotation_schedule were both specified",
            )),
            (None, None) => Err(BackendError::invalid_request(
                "one of rotation_schedule or rotation_period must be provided",
            )),
            (Some(period), None) => {
                let period = Duration::from_secs(period);
                if period < MIN_ROTATION_PERIOD {
                    return Err(BackendError::invalid_request(format!(
                        "rotation_period must be {} seconds or more",
                        MIN_ROTATION_PERIOD.as_secs()
                    )));
                }
                if self.rotation_window.is_some() {
                    return Err(BackendError::invalid_request(
                        "rotation_window is invalid with use of rotation_period",
                    ));
                }
                Ok(Cadence::Period(period))
            }
            (None, Some(expr)) => {
                let window = self.rotation_window.map(Duration::from_secs);
                if window.is_some_and(|w| w < MIN_ROTATION_WINDOW) {
                    return Err(BackendError::invalid_request(format!(
                        "rotation_window must be {} seconds or more",
                        MIN_ROTATION_WINDOW.as_secs()
                    )));
                }
                Ok(Cadence::Schedule {
                    schedule: Box::new(parse_schedule(expr)?),
                    window,
                })
            }
        }
    }

    /// Recompute `next_vault_rotation` from the last rotation, or from `now`
    /// when the role has never been rotated.
    ///
    /// # Errors
    ///
    /// Returns an error if the cadence is invalid.
    pub fn schedule_next(&mut self, now: DateTime<Utc>) -> BackendResult<DateTime<Utc>> {
        let from = self.last_vault_rotation.unwrap_or(now);
        let next = self.cadence()?.next_after(from)?;
        self.next_vault_rotation = Some(next);
        Ok(next)
    }

    /// Whether a rotation at `now` still falls inside the schedule window.
    /// Always true for period-based roles and schedules without a window.
    ///
    /// # Errors
    ///
    /// Returns an error if the cadence is invalid.
    pub fn in_rotation_window(&self, now: DateTime<Utc>) -> BackendResult<bool> {
        let Cadence::Schedule { window: Some(window), .. } = self.cadence()? else {
            return Ok(true);
        };
        let Some(scheduled) = self.next_vault_rotation else {
            return Ok(true);
        };
        let window = chrono::Duration::from_std(window)
            .map_err(|e| BackendError::invalid_request(format!("invalid rotation_window: {e}")))?;
        Ok(now <= scheduled + window)
    }

    /// Time left until the next rotation, zero when overdue.
    #[must_use]
    pub fn ttl(&self, now: DateTime<Utc>) -> Duration {
        self.next_vault_rotation
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Parse a cron expression. Five-field expressions get a leading seconds
/// field of `0`.
///
/// # Errors
///
/// Returns a validation error for malformed expressions.
pub fn parse_schedule(expr: &str) -> BackendResult<cron::Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| BackendError::invalid_request(format!("could not parse rotation_schedule: {e}")))
}

/// Match `name` against a glob where `*` matches any run of characters.
#[must_use]
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = name.chars().collect();
    let (mut pi, mut si) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;
    while si < s.len() {
        if pi < p.len() && p[pi] != '*' && p[pi] == s[si] {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(sp) = star {
            pi = sp + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
