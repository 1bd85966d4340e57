//! # JSON-RPC 2.0 Dispatch Engine
//!
//! The transport-agnostic core of the node's RPC layer. It parses and
//! classifies JSON-RPC messages, dispatches calls to registered service
//! methods, runs push-style subscriptions, and serves connections through a
//! small codec abstraction.
//!
//! ## Features
//! - Batches, notifications and call/response correlation
//! - Typed method registration with positional argument decoding
//! - Subscriptions with ordered, pre-activation buffered notifications
//! - Panic containment: a crashing method yields an internal error response
//! - Stream (IPC, in-process) and WebSocket codecs
//! - Optional Prometheus request metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use ethrpc_json_rpc::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Arc::new(Server::new());
//! server.register_name(
//!     "eth",
//!     ServiceBuilder::new().method("blockNumber", |_ctx, ()| async { Ok::<_, RpcError>("0x10") }),
//! )?;
//!
//! let (server_end, client_end) = ethrpc_json_rpc::codec::inproc::pipe();
//! tokio::spawn({
//!     let server = server.clone();
//!     async move { server.serve_codec(Arc::new(server_end)).await }
//! });
//! # drop(client_end);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod codec;
pub mod constants;
pub mod error;
pub mod handler;
#[cfg(unix)]
pub mod ipc;
pub mod message;
pub mod metrics;
pub mod notifier;
pub mod params;
pub mod prelude;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types
pub use callback::{CallContext, Callback, ReturnKind};
pub use codec::{ServerCodec, SharedCodec};
pub use constants::JSONRPC_VERSION;
pub use error::{
    CloseReason, CodecError, JsonRpcErrorCode, JsonRpcErrorObject, NotifierError, RegistryError,
    RpcError, ToJsonRpcError, error_codes,
};
pub use handler::{Handler, ResponseRouter};
pub use message::{JsonPayload, JsonRpcMessage, SubscriptionResult};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use notifier::{Notifier, Subscription};
pub use registry::{RpcService, ServiceBuilder, ServiceRegistry};
pub use server::{Server, ServerBuilder};
pub use types::{HttpInfo, IdGenerator, PeerInfo, SubscriptionId};
