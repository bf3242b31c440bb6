//! v5 gRPC client.

use super::GrpcConn;
use crate::convert::{map_to_struct, struct_to_map};
use crate::error::PluginResult;
use crate::proto::v5 as pb;
use crate::runner::PluginProcess;
use crate::v5::{
    DatabaseV5, DeleteUserRequest, DeleteUserResponse, InitializeRequest, InitializeResponse, NewUserRequest,
    NewUserResponse, UpdateUserRequest, UpdateUserResponse,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tonic::transport::Channel;
use tracing::instrument;

/// A v5 plugin reached over gRPC.
#[derive(Debug)]
pub struct GrpcDatabaseV5 {
    conn: GrpcConn,
    process: Option<PluginProcess>,
    closed: AtomicBool,
}

impl GrpcDatabaseV5 {
    /// Client over `channel`; `process` is killed on close.
    #[must_use]
    pub fn new(channel: Channel, process: Option<PluginProcess>) -> Self {
        Self {
            conn: GrpcConn::new(channel),
            process,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DatabaseV5 for GrpcDatabaseV5 {
    #[instrument(skip_all)]
    async fn initialize(&self, req: InitializeRequest) -> PluginResult<InitializeResponse> {
        let resp: pb::InitializeResponse = self
            .conn
            .unary(
                pb::INITIALIZE,
                pb::InitializeRequest {
                    config_data: Some(map_to_struct(&req.config)),
                    verify_connection: req.verify_connection,
                },
            )
            .await?;
        Ok(InitializeResponse {
            config: resp.config_data.as_ref().map(struct_to_map).unwrap_or_default(),
        })
    }

    #[instrument(skip_all)]
    async fn new_user(&self, req: NewUserRequest) -> PluginResult<NewUserResponse> {
        let resp: pb::NewUserResponse = self.conn.unary(pb::NEW_USER, pb::NewUserRequest::from(&req)).await?;
        Ok(NewUserResponse {
            username: resp.username,
        })
    }

    #[instrument(skip_all, fields(username = %req.username))]
    async fn update_user(&self, req: UpdateUserRequest) -> PluginResult<UpdateUserResponse> {
        let _: pb::UpdateUserResponse = self
            .conn
            .unary(pb::UPDATE_USER, pb::UpdateUserRequest::from(&req))
            .await?;
        Ok(UpdateUserResponse {})
    }

    #[instrument(skip_all, fields(username = %req.username))]
    async fn delete_user(&self, req: DeleteUserRequest) -> PluginResult<DeleteUserResponse> {
        let _: pb::DeleteUserResponse = self
            .conn
            .unary(pb::DELETE_USER, pb::DeleteUserRequest::from(&req))
            .await?;
        Ok(DeleteUserResponse {})
    }

    async fn type_name(&self) -> PluginResult<String> {
        let resp: pb::TypeResponse = self.conn.unary(pb::TYPE, pb::Empty {}).await?;
        Ok(resp.r#type)
    }

    async fn close(&self) -> PluginResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result: PluginResult<pb::Empty> = self.conn.unary(pb::CLOSE, pb::Empty {}).await;
        if let Some(process) = &self.process {
            process.kill().await;
        }
        result.map(|_| ())
    }
}
