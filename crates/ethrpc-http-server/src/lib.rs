//! # HTTP JSON-RPC Server
//!
//! This crate provides the HTTP and WebSocket transports for an
//! [`ethrpc_json_rpc::Server`]. Plain HTTP requests are served one request
//! (or batch) at a time without subscription support; WebSocket upgrades get
//! a full duplex connection with subscriptions and keepalive.
//!
//! ## Features
//! - Request validation (method, content length, content type)
//! - Health-check `GET` that never reaches the dispatcher
//! - CORS support for browser-based clients
//! - WebSocket origin allow-list
//!
//! ## Example
//!
//! ```rust,no_run
//! use ethrpc_http_server::HttpRpcServer;
//! use ethrpc_json_rpc::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = HttpRpcServer::builder()
//!     .bind_address("127.0.0.1:8545".parse()?)
//!     .websocket(true)
//!     .ws_origins(vec!["http://localhost:3000".to_string()])
//!     .build();
//! server.rpc().register_name(
//!     "web3",
//!     ServiceBuilder::new().infallible("clientVersion", |_ctx, ()| async { "ethrpc/0.3.0" }),
//! )?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod cors;
pub mod handler;
pub mod prelude;
pub mod server;
pub mod websocket;

// Re-export main types
pub use codec::HttpServerCodec;
pub use cors::CorsLayer;
pub use handler::RpcHttpHandler;
pub use server::{HttpRpcServer, HttpRpcServerBuilder, ServerConfig};
pub use websocket::OriginValidator;

/// Result type for HTTP server operations
pub type Result<T> = std::result::Result<T, HttpServerError>;

/// HTTP server errors
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] ethrpc_json_rpc::RegistryError),
}
