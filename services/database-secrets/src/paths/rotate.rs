//! `rotate-role/<name>` and `rotate-root/<name>`.

use crate::backend::DatabaseBackend;
use crate::error::{BackendError, BackendResult};
use tracing::instrument;
use vault_sdk::{Request, Response};

impl DatabaseBackend {
    /// Rotate a static role now and move its queue entry to the next
    /// scheduled time.
    #[instrument(skip(self, req))]
    pub(super) async fn rotate_role(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        let _guard = self.role_locks.lock(name).await;
        let Some(role) = self.store.static_role(name).await? else {
            if self.store.role(name).await?.is_some() {
                return Err(BackendError::invalid_request(
                    "cannot rotate credentials of non-static accounts",
                ));
            }
            return Err(BackendError::invalid_request(format!("no static role found for role name {name:?}")));
        };

        let wal_id = self.queue.pop_by_key(name).and_then(|item| item.value.wal_id);
        let now = self.clock.now();
        let result = self.set_static_account(&role, wal_id, now).await;
        match self.finish_rotation(role, result, now, req.operation) {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, req))]
    pub(super) async fn rotate_root(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        self.rotate_root_credentials(name, req.operation).await?;
        Ok(None)
    }
}
