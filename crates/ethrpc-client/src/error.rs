//! Error types for client operations

use ethrpc_json_rpc::{CloseReason, CodecError, JsonRpcErrorObject};
use std::fmt;
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The client was closed, or the call was pending when it was
    #[error("client is closed")]
    ClientQuit,

    /// The connection went away while the request was pending
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseReason),

    /// The server answered with an error object
    #[error("{0}")]
    Rpc(JsonRpcErrorObject),

    /// Non-2xx HTTP response
    #[error(transparent)]
    Http(#[from] HttpError),

    /// WebSocket dial or upgrade failed
    #[error(transparent)]
    WsHandshake(#[from] WsHandshakeError),

    #[error("transport error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("notifications not supported")]
    NotificationsUnsupported,

    #[error("subscription queue overflow")]
    QueueOverflow,

    #[error("request timed out")]
    Timeout,

    #[error("no result in JSON-RPC response")]
    NoResult,

    #[error("response batch did not contain a response to this call")]
    MissingResponse,
}

impl ClientError {
    /// The JSON-RPC error code, if the server returned an error object
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Rpc(err) => Some(err.code),
            _ => None,
        }
    }
}

impl From<CloseReason> for ClientError {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::ClientQuit => ClientError::ClientQuit,
            other => ClientError::ConnectionClosed(other),
        }
    }
}

impl From<JsonRpcErrorObject> for ClientError {
    fn from(err: JsonRpcErrorObject) -> Self {
        ClientError::Rpc(err)
    }
}

/// Returned for HTTP responses with a status outside 2xx
#[derive(Debug, Clone)]
pub struct HttpError {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "{} {}", self.status, self.status_text)
        } else {
            write!(f, "{} {}: {}", self.status, self.status_text, self.body)
        }
    }
}

impl std::error::Error for HttpError {}

/// Returned when the WebSocket handshake fails
#[derive(Debug, Clone)]
pub struct WsHandshakeError {
    pub message: String,
    pub status: Option<u16>,
}

impl fmt::Display for WsHandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP status {status})")?;
        }
        Ok(())
    }
}

impl std::error::Error for WsHandshakeError {}
