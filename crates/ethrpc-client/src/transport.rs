//! Transport layer for the client
//!
//! A [`Connector`] produces a fresh codec for a persistent connection. The
//! client calls it once when dialing and again whenever the previous
//! connection was lost. HTTP is special: it has no persistent connection and
//! sends each request on its own.

use async_trait::async_trait;
use ethrpc_json_rpc::SharedCodec;

use crate::error::ClientResult;

pub mod http;
pub mod inproc;
#[cfg(unix)]
pub mod ipc;
pub mod ws;

pub use self::http::HttpConn;
pub use self::inproc::InProcConnector;
#[cfg(unix)]
pub use self::ipc::IpcConnector;
pub use self::ws::WsConnector;

/// Opens persistent connections to one endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> ClientResult<SharedCodec>;

    /// Endpoint description for logging
    fn endpoint(&self) -> String;
}
