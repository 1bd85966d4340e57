//! Newline-delimited JSON over any byte stream (IPC sockets, TCP, in-process pipes).

use async_trait::async_trait;
use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{ServerCodec, write_deadline};
use crate::error::CodecError;
use crate::message::{JsonPayload, JsonRpcMessage, parse_message};
use crate::types::PeerInfo;

/// Incrementally splits a byte stream into JSON values.
struct ValueReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ValueReader<R> {
    async fn next_value(&mut self, closed: &CancellationToken) -> Result<Box<RawValue>, CodecError> {
        loop {
            if let Some(value) = self.try_decode()? {
                return Ok(value);
            }
            self.buf.reserve(4096);
            let n = tokio::select! {
                _ = closed.cancelled() => return Err(CodecError::Eof),
                n = self.inner.read_buf(&mut self.buf) => n?,
            };
            if n == 0 {
                return Err(CodecError::Eof);
            }
        }
    }

    fn try_decode(&mut self) -> Result<Option<Box<RawValue>>, CodecError> {
        let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Box<RawValue>>();
        match values.next() {
            Some(Ok(value)) => {
                let consumed = values.byte_offset();
                self.buf.drain(..consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e.into()),
            None => {
                self.buf.clear();
                Ok(None)
            }
        }
    }
}

/// A duplex codec exchanging one JSON value per message.
pub struct JsonCodec<S> {
    peer: PeerInfo,
    reader: Mutex<ValueReader<ReadHalf<S>>>,
    writer: Mutex<WriteHalf<S>>,
    closed: CancellationToken,
}

impl<S> JsonCodec<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, peer: PeerInfo) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            peer,
            reader: Mutex::new(ValueReader {
                inner: read,
                buf: Vec::new(),
            }),
            writer: Mutex::new(write),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl<S> ServerCodec for JsonCodec<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read_batch(&self) -> Result<(Vec<JsonRpcMessage>, bool), CodecError> {
        let mut reader = self.reader.lock().await;
        let value = reader.next_value(&self.closed).await?;
        Ok(parse_message(value.get().as_bytes()))
    }

    async fn write_json(
        &self,
        payload: &JsonPayload,
        deadline: Option<Instant>,
    ) -> Result<(), CodecError> {
        if self.closed.is_cancelled() {
            return Err(CodecError::Closed);
        }
        let mut data = serde_json::to_vec(payload)?;
        data.push(b'\n');
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&data).await?;
            writer.flush().await
        };
        match timeout_at(write_deadline(deadline), write).await {
            Ok(result) => result.map_err(CodecError::from),
            Err(_) => Err(CodecError::DeadlineExceeded("write")),
        }
    }

    fn peer_info(&self) -> PeerInfo {
        self.peer.clone()
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!(remote = %self.peer.remote_addr, error = %e, "Error shutting down stream");
        }
    }
}
