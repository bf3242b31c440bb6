//! `reset/<name>` and `reload/<plugin_name>`.

use crate::backend::DatabaseBackend;
use crate::error::{BackendError, BackendResult};
use crate::events;
use serde_json::{json, Map};
use tracing::{info, instrument, warn};
use vault_sdk::{Request, Response};

impl DatabaseBackend {
    /// Evict the connection's plugin so the next use reinitializes it.
    #[instrument(skip(self, req))]
    pub(super) async fn reset_connection(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        if self.store.connection(name).await?.is_none() {
            return Err(BackendError::invalid_request(format!(
                "failed to find entry for connection with name: {name:?}"
            )));
        }
        let evicted = self.connections.reset(name).await?;
        info!(connection = name, evicted, "connection reset");
        self.events.emit(events::CONNECTION_RESET, req.operation, Some(name), &[]);
        Ok(None)
    }

    /// Restart the plugin of every connection configured with
    /// `plugin_name`.
    #[instrument(skip(self, req))]
    pub(super) async fn reload_plugin(&self, req: &Request, plugin_name: &str) -> BackendResult<Option<Response>> {
        let mut reloaded = Vec::new();
        let mut warnings = Vec::new();
        for name in self.store.list_connections().await? {
            let Some(config) = self.store.connection(&name).await? else {
                continue;
            };
            if config.plugin_name != plugin_name {
                continue;
            }
            self.connections.reset(&name).await?;
            if let Err(e) = self.get_connection(&name).await {
                warn!(connection = %name, error = %e, "failed to restart plugin");
                warnings.push(format!("failed to reload connection {name:?}: {e}"));
            }
            reloaded.push(name);
        }

        info!(plugin = plugin_name, count = reloaded.len(), "plugin reloaded");
        self.events
            .emit(events::PLUGIN_RELOAD, req.operation, None, &[("plugin_name", plugin_name)]);

        let mut data = Map::new();
        data.insert("count".into(), json!(reloaded.len()));
        data.insert("connections".into(), json!(reloaded));
        let mut response = Response::with_data(data);
        for warning in warnings {
            response.add_warning(warning);
        }
        Ok(Some(response))
    }
}
