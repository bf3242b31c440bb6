//! Logical requests and responses exchanged between the host and an engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Operation requested on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create a new entry
    Create,
    /// Read an entry
    Read,
    /// Update or create an entry
    Update,
    /// Delete an entry
    Delete,
    /// List entries under a prefix
    List,
}

impl Operation {
    /// Lowercase operation name as used in event metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

/// Lease attached to a response or handed back on renew/revoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    /// Data the engine needs to renew or revoke; never shown to callers
    pub internal_data: Map<String, Value>,
    /// Lease TTL
    pub ttl: Duration,
    /// Hard cap measured from `issue_time`
    pub max_ttl: Duration,
    /// Whether the lease may be renewed
    pub renewable: bool,
    /// When the lease was first issued
    pub issue_time: DateTime<Utc>,
}

impl Secret {
    /// A renewable lease issued at `issue_time`.
    #[must_use]
    pub fn new(internal_data: Map<String, Value>, issue_time: DateTime<Utc>) -> Self {
        Self {
            internal_data,
            ttl: Duration::ZERO,
            max_ttl: Duration::ZERO,
            renewable: true,
            issue_time,
        }
    }

    /// Set TTL and max TTL.
    #[must_use]
    pub const fn with_ttls(mut self, ttl: Duration, max_ttl: Duration) -> Self {
        self.ttl = ttl;
        self.max_ttl = max_ttl;
        self
    }

    /// String value from the internal data.
    #[must_use]
    pub fn internal_str(&self, key: &str) -> Option<&str> {
        self.internal_data.get(key).and_then(Value::as_str)
    }
}

/// Request dispatched to an engine.
#[derive(Debug, Clone)]
pub struct Request {
    /// Operation
    pub operation: Operation,
    /// Path relative to the mount
    pub path: String,
    /// Request body
    pub data: Map<String, Value>,
    /// Display name of the authenticated caller
    pub display_name: String,
    /// Mount point the engine is attached at
    pub mount_point: String,
    /// Lease being renewed or revoked
    pub secret: Option<Secret>,
}

impl Request {
    /// Create a request with an empty body.
    #[must_use]
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            data: Map::new(),
            display_name: "token".to_string(),
            mount_point: String::new(),
            secret: None,
        }
    }

    /// Set the request body. Non-object values are ignored.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    /// Set the caller display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set the mount point.
    #[must_use]
    pub fn with_mount_point(mut self, mount: impl Into<String>) -> Self {
        self.mount_point = mount.into();
        self
    }

    /// Attach a lease.
    #[must_use]
    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secret = Some(secret);
        self
    }
}

/// Response returned by an engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Response body
    pub data: Option<Map<String, Value>>,
    /// Lease, for responses that issue credentials
    pub secret: Option<Secret>,
    /// Non-fatal warnings
    pub warnings: Vec<String>,
}

impl Response {
    /// A response carrying `data`.
    #[must_use]
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// A structured error response; the host renders it as a 400.
    #[must_use]
    pub fn error_response(msg: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("error".to_string(), Value::String(msg.into()));
        Self::with_data(data)
    }

    /// A list response with the given keys.
    #[must_use]
    pub fn list_response(keys: Vec<String>) -> Self {
        let mut data = Map::new();
        data.insert(
            "keys".to_string(),
            Value::Array(keys.into_iter().map(Value::String).collect()),
        );
        Self::with_data(data)
    }

    /// Whether this is an error response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.contains_key("error"))
    }

    /// The error message of an error response.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.data.as_ref()?.get("error")?.as_str()
    }

    /// Add a warning.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Value of a body key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.as_ref()?.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response() {
        let resp = Response::error_response("cannot rotate credentials of non-static accounts");
        assert!(resp.is_error());
        assert_eq!(
            resp.error(),
            Some("cannot rotate credentials of non-static accounts")
        );
    }

    #[test]
    fn test_list_response() {
        let resp = Response::list_response(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(resp.get("keys"), Some(&json!(["a", "b"])));
        assert!(!resp.is_error());
    }

    #[test]
    fn test_request_builder() {
        let req = Request::new(Operation::Update, "config/pg")
            .with_data(json!({"plugin_name": "postgresql-database-plugin"}))
            .with_display_name("approle");
        assert_eq!(req.data["plugin_name"], "postgresql-database-plugin");
        assert_eq!(req.display_name, "approle");
        assert_eq!(req.operation.as_str(), "update");
    }

    #[test]
    fn test_secret_internal_data() {
        let mut data = Map::new();
        data.insert("username".to_string(), json!("v-token-role"));
        let secret = Secret::new(data, Utc::now());
        assert_eq!(secret.internal_str("username"), Some("v-token-role"));
        assert_eq!(secret.internal_str("missing"), None);
    }
}
