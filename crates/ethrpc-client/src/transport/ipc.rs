//! Unix-domain socket transport

use async_trait::async_trait;
use ethrpc_json_rpc::codec::JsonCodec;
use ethrpc_json_rpc::{PeerInfo, SharedCodec};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;

use super::Connector;
use crate::error::ClientResult;

pub struct IpcConnector {
    path: PathBuf,
}

impl IpcConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for IpcConnector {
    async fn connect(&self) -> ClientResult<SharedCodec> {
        let stream = UnixStream::connect(&self.path).await?;
        let peer = PeerInfo::new("ipc", self.endpoint());
        Ok(Arc::new(JsonCodec::new(stream, peer)))
    }

    fn endpoint(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[tokio::test]
    async fn test_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let connector = IpcConnector::new(dir.path().join("missing.ipc"));
        assert!(matches!(connector.connect().await, Err(ClientError::Io(_))));
    }
}
