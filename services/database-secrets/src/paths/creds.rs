//! `creds/<name>`: dynamic credential issuance.

use crate::backend::DatabaseBackend;
use crate::error::BackendResult;
use vault_sdk::{Request, Response};

impl DatabaseBackend {
    pub(super) async fn creds_read(&self, req: &Request, name: &str) -> BackendResult<Option<Response>> {
        self.issue_credentials(req, name).await.map(Some)
    }
}
