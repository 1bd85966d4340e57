//! Commonly used types for running an HTTP JSON-RPC endpoint.

pub use crate::server::{HttpRpcServer, HttpRpcServerBuilder, ServerConfig};
pub use crate::websocket::OriginValidator;
pub use crate::{HttpServerError, Result};
