//! In-process transport: an in-memory pipe served directly by a [`Server`]

use async_trait::async_trait;
use ethrpc_json_rpc::codec::inproc::pipe;
use ethrpc_json_rpc::{Server, SharedCodec};
use std::sync::Arc;

use super::Connector;
use crate::error::ClientResult;

pub struct InProcConnector {
    server: Arc<Server>,
}

impl InProcConnector {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Connector for InProcConnector {
    async fn connect(&self) -> ClientResult<SharedCodec> {
        let (server_end, client_end) = pipe();
        let server = self.server.clone();
        tokio::spawn(async move { server.serve_codec(Arc::new(server_end)).await });
        Ok(Arc::new(client_end))
    }

    fn endpoint(&self) -> String {
        "inproc".to_string()
    }
}
