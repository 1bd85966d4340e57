//! Single-shot codec for one HTTP request.
//!
//! The request body is read once; everything the handler writes is collected
//! into the response body.

use async_trait::async_trait;
use bytes::Bytes;
use ethrpc_json_rpc::message::parse_message;
use ethrpc_json_rpc::{CodecError, JsonPayload, JsonRpcMessage, PeerInfo, ServerCodec};
use parking_lot::Mutex;
use serde_json::value::RawValue;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct HttpServerCodec {
    peer: PeerInfo,
    body: Mutex<Option<Bytes>>,
    response: Mutex<Vec<u8>>,
    closed: CancellationToken,
}

impl HttpServerCodec {
    pub fn new(body: Bytes, peer: PeerInfo) -> Self {
        Self {
            peer,
            body: Mutex::new(Some(body)),
            response: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
        }
    }

    /// Everything written so far, leaving the buffer empty
    pub fn take_response(&self) -> Bytes {
        Bytes::from(std::mem::take(&mut *self.response.lock()))
    }
}

#[async_trait]
impl ServerCodec for HttpServerCodec {
    async fn read_batch(&self) -> Result<(Vec<JsonRpcMessage>, bool), CodecError> {
        let Some(body) = self.body.lock().take() else {
            return Err(CodecError::Eof);
        };
        // Only the first JSON value of the body is considered.
        let mut values = serde_json::Deserializer::from_slice(&body).into_iter::<Box<RawValue>>();
        match values.next() {
            None => Err(CodecError::Eof),
            Some(Err(e)) => Err(CodecError::Json(e)),
            Some(Ok(value)) => Ok(parse_message(value.get().as_bytes())),
        }
    }

    async fn write_json(
        &self,
        payload: &JsonPayload,
        _deadline: Option<Instant>,
    ) -> Result<(), CodecError> {
        if self.closed.is_cancelled() {
            return Err(CodecError::Closed);
        }
        let mut encoded = serde_json::to_vec(payload)?;
        encoded.push(b'\n');
        self.response.lock().extend_from_slice(&encoded);
        Ok(())
    }

    fn peer_info(&self) -> PeerInfo {
        self.peer.clone()
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
