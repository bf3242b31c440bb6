//! gRPC clients for out-of-process plugins.

mod client_v4;
mod client_v5;

pub use client_v4::GrpcDatabaseV4;
pub use client_v5::GrpcDatabaseV5;

use crate::error::{PluginError, PluginResult};
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;

/// Unary-call helper over a plugin channel.
#[derive(Debug, Clone)]
pub(crate) struct GrpcConn {
    grpc: Grpc<Channel>,
}

impl GrpcConn {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            grpc: Grpc::new(channel),
        }
    }

    /// Invoke `path` with `request`.
    pub(crate) async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> PluginResult<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| PluginError::transport(format!("plugin not ready: {e}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(tonic::Request::new(request), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }
}
