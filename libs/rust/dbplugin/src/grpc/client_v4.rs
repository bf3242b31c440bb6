//! Legacy v4 gRPC client.

use super::GrpcConn;
use crate::convert::{json_bytes_to_map, map_to_json_bytes, to_timestamp};
use crate::error::PluginResult;
use crate::proto::v4 as pb;
use crate::runner::PluginProcess;
use crate::v4::{DatabaseV4, StatementsV4, StaticUserConfig};
use crate::v5::UsernameMetadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tonic::transport::Channel;
use tracing::instrument;

/// A v4 plugin reached over gRPC.
#[derive(Debug)]
pub struct GrpcDatabaseV4 {
    conn: GrpcConn,
    process: Option<PluginProcess>,
    closed: AtomicBool,
}

impl GrpcDatabaseV4 {
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
impl DatabaseV4 for GrpcDatabaseV4 {
    async fn type_name(&self) -> PluginResult<String> {
        let resp: pb::TypeResponse = self.conn.unary(pb::TYPE, pb::Empty {}).await?;
        Ok(resp.r#type)
    }

    #[instrument(skip_all)]
    async fn create_user(
        &self,
        statements: StatementsV4,
        username_config: UsernameMetadata,
        expiration: DateTime<Utc>,
    ) -> PluginResult<(String, String)> {
        let resp: pb::CreateUserResponse = self
            .conn
            .unary(
                pb::CREATE_USER,
                pb::CreateUserRequest {
                    statements: Some((&statements).into()),
                    username_config: Some(pb::UsernameConfig {
                        display_name: username_config.display_name,
                        role_name: username_config.role_name,
                    }),
                    expiration: Some(to_timestamp(expiration)),
                },
            )
            .await?;
        Ok((resp.username, resp.password))
    }

    #[instrument(skip_all, fields(username = %username))]
    async fn renew_user(
        &self,
        statements: StatementsV4,
        username: &str,
        expiration: DateTime<Utc>,
    ) -> PluginResult<()> {
        let _: pb::Empty = self
            .conn
            .unary(
                pb::RENEW_USER,
                pb::RenewUserRequest {
                    statements: Some((&statements).into()),
                    username: username.to_string(),
                    expiration: Some(to_timestamp(expiration)),
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(username = %username))]
    async fn revoke_user(&self, statements: StatementsV4, username: &str) -> PluginResult<()> {
        let _: pb::Empty = self
            .conn
            .unary(
                pb::REVOKE_USER,
                pb::RevokeUserRequest {
                    statements: Some((&statements).into()),
                    username: username.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn rotate_root_credentials(&self, statements: Vec<String>) -> PluginResult<Map<String, Value>> {
        let resp: pb::RotateRootCredentialsResponse = self
            .conn
            .unary(
                pb::ROTATE_ROOT_CREDENTIALS,
                pb::RotateRootCredentialsRequest { statements },
            )
            .await?;
        json_bytes_to_map(&resp.config)
    }

    #[instrument(skip_all)]
    async fn init(&self, config: Map<String, Value>, verify_connection: bool) -> PluginResult<Map<String, Value>> {
        let resp: pb::InitResponse = self
            .conn
            .unary(
                pb::INIT,
                pb::InitRequest {
                    config: map_to_json_bytes(&config)?,
                    verify_connection,
                },
            )
            .await?;
        json_bytes_to_map(&resp.config)
    }

    #[instrument(skip_all, fields(username = %static_user.username))]
    async fn set_credentials(
        &self,
        statements: StatementsV4,
        static_user: StaticUserConfig,
    ) -> PluginResult<(String, String)> {
        let resp: pb::SetCredentialsResponse = self
            .conn
            .unary(
                pb::SET_CREDENTIALS,
                pb::SetCredentialsRequest {
                    statements: Some((&statements).into()),
                    static_user_config: Some((&static_user).into()),
                },
            )
            .await?;
        Ok((resp.username, resp.password))
    }

    async fn generate_credentials(&self) -> PluginResult<String> {
        let resp: pb::GenerateCredentialsResponse =
            self.conn.unary(pb::GENERATE_CREDENTIALS, pb::Empty {}).await?;
        Ok(resp.password)
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
