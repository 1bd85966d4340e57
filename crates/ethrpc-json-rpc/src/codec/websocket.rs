//! WebSocket codec with keepalive.
//!
//! A ping is sent after [`WS_PING_INTERVAL`] without outbound traffic. Once a
//! ping is out, the read side expects a pong within [`WS_PONG_TIMEOUT`] and
//! fails the connection otherwise.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{ServerCodec, write_deadline};
use crate::constants::{WS_MESSAGE_SIZE_LIMIT, WS_PING_INTERVAL, WS_PING_WRITE_TIMEOUT, WS_PONG_TIMEOUT};
use crate::error::CodecError;
use crate::message::{JsonPayload, JsonRpcMessage, parse_message};
use crate::types::PeerInfo;

type WsSink<S> = Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>;

struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    pong_deadline: watch::Receiver<Option<Instant>>,
}

/// A duplex codec over an established WebSocket.
pub struct WebSocketCodec<S> {
    peer: PeerInfo,
    sink: WsSink<S>,
    reader: Mutex<WsReader<S>>,
    pong_deadline: Arc<watch::Sender<Option<Instant>>>,
    ping_reset: mpsc::Sender<()>,
    ping_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: CancellationToken,
    read_limit: usize,
}

impl<S> WebSocketCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>, peer: PeerInfo) -> Self {
        Self::with_read_limit(ws, peer, WS_MESSAGE_SIZE_LIMIT)
    }

    /// Must be called from within a tokio runtime; spawns the keepalive task.
    pub fn with_read_limit(ws: WebSocketStream<S>, peer: PeerInfo, read_limit: usize) -> Self {
        let (sink, stream) = ws.split();
        let sink = Arc::new(Mutex::new(sink));
        let (deadline_tx, deadline_rx) = watch::channel(None);
        let pong_deadline = Arc::new(deadline_tx);
        let (ping_reset, reset_rx) = mpsc::channel(1);
        let closed = CancellationToken::new();

        let ping_task = tokio::spawn(ping_loop(
            sink.clone(),
            closed.clone(),
            reset_rx,
            pong_deadline.clone(),
            peer.remote_addr.clone(),
        ));

        Self {
            peer,
            sink,
            reader: Mutex::new(WsReader {
                stream,
                pong_deadline: deadline_rx,
            }),
            pong_deadline,
            ping_reset,
            ping_task: parking_lot::Mutex::new(Some(ping_task)),
            closed,
            read_limit,
        }
    }

    fn decode(&self, data: &[u8]) -> Result<(Vec<JsonRpcMessage>, bool), CodecError> {
        if data.len() > self.read_limit {
            return Err(CodecError::MessageTooLarge {
                size: data.len(),
                limit: self.read_limit,
            });
        }
        let value: Box<serde_json::value::RawValue> = serde_json::from_slice(data)?;
        Ok(parse_message(value.get().as_bytes()))
    }
}

async fn ping_loop<S>(
    sink: WsSink<S>,
    closed: CancellationToken,
    mut reset: mpsc::Receiver<()>,
    pong_deadline: Arc<watch::Sender<Option<Instant>>>,
    remote: String,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let timer = tokio::time::sleep(WS_PING_INTERVAL);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            r = reset.recv() => {
                if r.is_none() {
                    return;
                }
                timer.as_mut().reset(Instant::now() + WS_PING_INTERVAL);
            }
            _ = &mut timer => {
                pong_deadline.send_replace(Some(Instant::now() + WS_PONG_TIMEOUT));
                let mut sink = sink.lock().await;
                match timeout(WS_PING_WRITE_TIMEOUT, sink.send(Message::Ping(Default::default()))).await {
                    Ok(Ok(())) => trace!(remote = %remote, "Sent websocket ping"),
                    Ok(Err(e)) => debug!(remote = %remote, error = %e, "Failed to send websocket ping"),
                    Err(_) => debug!(remote = %remote, "Websocket ping write timed out"),
                }
                drop(sink);
                timer.as_mut().reset(Instant::now() + WS_PING_INTERVAL);
            }
        }
    }
}

async fn pong_timeout(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn map_ws_error(err: WsError) -> CodecError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => CodecError::Eof,
        WsError::Io(e) => CodecError::Io(e),
        other => CodecError::WebSocket(other.to_string()),
    }
}

#[async_trait]
impl<S> ServerCodec for WebSocketCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_batch(&self) -> Result<(Vec<JsonRpcMessage>, bool), CodecError> {
        let mut reader = self.reader.lock().await;
        let WsReader {
            stream,
            pong_deadline,
        } = &mut *reader;
        loop {
            let deadline = *pong_deadline.borrow_and_update();
            let item = tokio::select! {
                _ = self.closed.cancelled() => return Err(CodecError::Eof),
                changed = pong_deadline.changed() => {
                    if changed.is_err() {
                        return Err(CodecError::Eof);
                    }
                    continue;
                }
                _ = pong_timeout(deadline) => return Err(CodecError::DeadlineExceeded("pong")),
                item = stream.next() => item,
            };
            match item {
                None => return Err(CodecError::Eof),
                Some(Err(e)) => return Err(map_ws_error(e)),
                Some(Ok(Message::Text(text))) => return self.decode(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => return self.decode(&data),
                Some(Ok(Message::Pong(_))) => {
                    self.pong_deadline.send_replace(None);
                }
                Some(Ok(Message::Close(_))) => return Err(CodecError::Eof),
                Some(Ok(_)) => {}
            }
        }
    }

    async fn write_json(
        &self,
        payload: &JsonPayload,
        deadline: Option<Instant>,
    ) -> Result<(), CodecError> {
        if self.closed.is_cancelled() {
            return Err(CodecError::Closed);
        }
        let text = serde_json::to_string(payload)?;
        let mut sink = self.sink.lock().await;
        match timeout_at(write_deadline(deadline), sink.send(Message::text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(map_ws_error(e)),
            Err(_) => return Err(CodecError::DeadlineExceeded("write")),
        }
        let _ = self.ping_reset.try_send(());
        Ok(())
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
        {
            let mut sink = self.sink.lock().await;
            if let Ok(Err(e)) = timeout(WS_PING_WRITE_TIMEOUT, sink.close()).await {
                trace!(remote = %self.peer.remote_addr, error = %e, "Error closing websocket");
            }
        }
        let task = self.ping_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
