//! Transport abstraction.
//!
//! A codec reads messages from and writes messages to one connection. Reads
//! are only ever issued by the connection's dispatch loop; writes may come
//! from concurrent call tasks and notifiers, so implementations serialize them.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::constants::DEFAULT_WRITE_TIMEOUT;
use crate::error::CodecError;
use crate::message::{JsonPayload, JsonRpcMessage};
use crate::types::PeerInfo;

pub mod inproc;
pub mod stream;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use stream::JsonCodec;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketCodec;

/// One side of a JSON-RPC connection
#[async_trait]
pub trait ServerCodec: Send + Sync + 'static {
    /// Read the next unit from the connection: one message, or all messages of a batch.
    async fn read_batch(&self) -> Result<(Vec<JsonRpcMessage>, bool), CodecError>;

    /// Write a message or batch. Without a deadline, [`DEFAULT_WRITE_TIMEOUT`] applies.
    async fn write_json(
        &self,
        payload: &JsonPayload,
        deadline: Option<Instant>,
    ) -> Result<(), CodecError>;

    fn peer_info(&self) -> PeerInfo;

    fn remote_addr(&self) -> String {
        self.peer_info().remote_addr
    }

    /// Token cancelled once the connection is closed
    fn closed(&self) -> CancellationToken;

    /// Close the connection. Pending reads return EOF.
    async fn close(&self);
}

pub type SharedCodec = Arc<dyn ServerCodec>;

pub(crate) fn write_deadline(deadline: Option<Instant>) -> Instant {
    deadline.unwrap_or_else(|| Instant::now() + DEFAULT_WRITE_TIMEOUT)
}
