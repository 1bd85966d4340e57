//! # JSON-RPC Client
//!
//! A client for the node's JSON-RPC endpoints over HTTP, WebSocket, IPC and
//! in-process pipes.
//!
//! ## Features
//!
//! - **Transports**: HTTP (one POST per call), WebSocket, Unix sockets and in-process pipes
//! - **Batches**: [`BatchElem`] carries each element's result or error
//! - **Subscriptions**: ordered, buffered forwarding into a `tokio::sync::mpsc` channel
//! - **Reconnect**: a lost persistent connection is redialed on the next send
//! - **Reverse calls**: services registered on the client answer server-to-client calls
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ethrpc_client::Client;
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::dial("ws://127.0.0.1:8546").await?;
//!
//!     let block: String = client.call("eth_blockNumber", ()).await?;
//!     println!("head: {block}");
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::channel::<Value>(16);
//!     let sub = client.eth_subscribe(tx, "newHeads", ()).await?;
//!     while let Some(head) = rx.recv().await {
//!         println!("{head}");
//!     }
//!     sub.unsubscribe().await;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod prelude;
pub mod subscription;
pub mod transport;

// Re-export main types
pub use client::{BatchElem, Client};
pub use config::{ClientConfig, HttpAuth};
pub use error::{ClientError, ClientResult, HttpError, WsHandshakeError};
pub use subscription::ClientSubscription;
pub use transport::Connector;
