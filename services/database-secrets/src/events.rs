//! Observation events emitted by the engine.

use std::sync::Arc;
use tracing::warn;
use vault_sdk::{Event, EventSender, Operation};

/// Connection config written.
pub const CONFIG_WRITE: &str = "database/connection/config/write";
/// Connection config read.
pub const CONFIG_READ: &str = "database/connection/config/read";
/// Connection config deleted.
pub const CONFIG_DELETE: &str = "database/connection/config/delete";
/// Connection plugin evicted.
pub const CONNECTION_RESET: &str = "database/connection/reset";
/// Plugin reloaded across connections. Carries no connection name.
pub const PLUGIN_RELOAD: &str = "database/plugin/reload";
/// Dynamic role created.
pub const ROLE_CREATE: &str = "database/role/create";
/// Dynamic role updated.
pub const ROLE_UPDATE: &str = "database/role/update";
/// Dynamic role read.
pub const ROLE_READ: &str = "database/role/read";
/// Dynamic role deleted. Carries no connection name.
pub const ROLE_DELETE: &str = "database/role/delete";
/// Dynamic credentials issued.
pub const CREDS_CREATE_SUCCESS: &str = "database/creds/create/success";
/// Dynamic credential issuance failed.
pub const CREDS_CREATE_FAIL: &str = "database/creds/create/fail";
/// Lease renewed.
pub const CREDS_RENEW: &str = "database/creds/renew";
/// Lease revoked.
pub const CREDS_REVOKE: &str = "database/creds/revoke";
/// Static role created.
pub const STATIC_ROLE_CREATE: &str = "database/static-role/create";
/// Static role updated.
pub const STATIC_ROLE_UPDATE: &str = "database/static-role/update";
/// Static role read.
pub const STATIC_ROLE_READ: &str = "database/static-role/read";
/// Static role deleted. Carries no connection name.
pub const STATIC_ROLE_DELETE: &str = "database/static-role/delete";
/// Static credentials read.
pub const STATIC_CREDS_READ: &str = "database/static-creds/read";
/// Static role rotated.
pub const STATIC_ROTATE_SUCCESS: &str = "database/static-role/rotate/success";
/// Static role rotation failed.
pub const STATIC_ROTATE_FAIL: &str = "database/static-role/rotate/fail";
/// Root credentials rotated.
pub const ROTATE_ROOT_SUCCESS: &str = "database/rotate-root/success";
/// Root credential rotation failed.
pub const ROTATE_ROOT_FAIL: &str = "database/rotate-root/fail";

/// Sends events stamped with the mount path.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: Arc<dyn EventSender>,
    mount_path: String,
}

impl EventEmitter {
    /// Emitter for `mount_path`.
    #[must_use]
    pub fn new(sender: Arc<dyn EventSender>, mount_path: impl Into<String>) -> Self {
        Self {
            sender,
            mount_path: mount_path.into(),
        }
    }

    /// Emit `event_type`. Delivery failures are logged, never returned.
    pub fn emit(
        &self,
        event_type: &str,
        operation: Operation,
        connection_name: Option<&str>,
        extra: &[(&str, &str)],
    ) {
        let mut event = Event::new(event_type)
            .with("mount_path", self.mount_path.as_str())
            .with("operation", operation.as_str());
        if let Some(name) = connection_name {
            event = event.with("connection_name", name);
        }
        for (key, value) in extra {
            event = event.with(*key, *value);
        }
        if let Err(e) = self.sender.send_event(event) {
            warn!(event_type, error = %e, "failed to send event");
        }
    }
}
