//! HTTP JSON-RPC server
//!
//! Accepts TCP connections, serves HTTP/1.1 on each, and hands requests to
//! [`RpcHttpHandler`]. WebSocket upgrades on the configured path become
//! persistent connections on the wrapped [`Server`].

use ethrpc_json_rpc::Server;
use ethrpc_json_rpc::constants::{
    MAX_REQUEST_CONTENT_LENGTH, WS_MESSAGE_SIZE_LIMIT, WS_READ_BUFFER_SIZE, WS_WRITE_BUFFER_SIZE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{Result, RpcHttpHandler};

/// Configuration for the HTTP JSON-RPC server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path for JSON-RPC over HTTP
    pub rpc_path: String,
    /// Accept WebSocket upgrades
    pub enable_websocket: bool,
    /// Path for WebSocket upgrades; the RPC path when unset
    pub ws_path: Option<String>,
    /// Enable CORS
    pub enable_cors: bool,
    /// Origins allowed by CORS; empty allows any
    pub cors_origins: Vec<String>,
    /// Origins allowed to open WebSocket connections
    pub ws_origins: Vec<String>,
    /// Maximum request body size
    pub max_body_size: usize,
    /// Time allowed for reading request headers
    pub read_timeout: Duration,
    /// Time allowed for producing a response
    pub write_timeout: Duration,
    pub ws_read_buffer_size: usize,
    pub ws_write_buffer_size: usize,
    pub ws_message_size_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8545)),
            rpc_path: "/".to_string(),
            enable_websocket: false,
            ws_path: None,
            enable_cors: true,
            cors_origins: Vec::new(),
            ws_origins: Vec::new(),
            max_body_size: MAX_REQUEST_CONTENT_LENGTH,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            ws_read_buffer_size: WS_READ_BUFFER_SIZE,
            ws_write_buffer_size: WS_WRITE_BUFFER_SIZE,
            ws_message_size_limit: WS_MESSAGE_SIZE_LIMIT,
        }
    }
}

impl ServerConfig {
    pub fn ws_endpoint(&self) -> &str {
        self.ws_path.as_deref().unwrap_or(&self.rpc_path)
    }
}

/// Builder for [`HttpRpcServer`]
pub struct HttpRpcServerBuilder {
    config: ServerConfig,
    rpc: Option<Arc<Server>>,
}

impl HttpRpcServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            rpc: None,
        }
    }

    /// Serve an existing RPC server instead of a fresh one
    pub fn rpc_server(mut self, rpc: Arc<Server>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set the JSON-RPC endpoint path
    pub fn rpc_path(mut self, path: impl Into<String>) -> Self {
        self.config.rpc_path = path.into();
        self
    }

    /// Enable or disable WebSocket upgrades
    pub fn websocket(mut self, enable: bool) -> Self {
        self.config.enable_websocket = enable;
        self
    }

    /// Serve WebSocket upgrades on a separate path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.config.ws_path = Some(path.into());
        self
    }

    /// Enable or disable CORS
    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.config.cors_origins = origins;
        self
    }

    /// Origins allowed to open WebSocket connections; `"*"` allows any
    pub fn ws_origins(mut self, origins: Vec<String>) -> Self {
        self.config.ws_origins = origins;
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn ws_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.config.ws_read_buffer_size = read;
        self.config.ws_write_buffer_size = write;
        self
    }

    pub fn build(self) -> HttpRpcServer {
        let config = Arc::new(self.config);
        let rpc = self.rpc.unwrap_or_else(|| Arc::new(Server::new()));
        let handler = Arc::new(RpcHttpHandler::new(config.clone(), rpc.clone()));
        HttpRpcServer {
            config,
            rpc,
            handler,
            shutdown: CancellationToken::new(),
        }
    }
}

impl Default for HttpRpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP (and optionally WebSocket) endpoint for a JSON-RPC server
pub struct HttpRpcServer {
    config: Arc<ServerConfig>,
    rpc: Arc<Server>,
    handler: Arc<RpcHttpHandler>,
    shutdown: CancellationToken,
}

impl HttpRpcServer {
    pub fn builder() -> HttpRpcServerBuilder {
        HttpRpcServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The RPC server requests are dispatched to; register services here.
    pub fn rpc(&self) -> &Arc<Server> {
        &self.rpc
    }

    /// Bind the configured address and serve until [`HttpRpcServer::stop`]
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!("HTTP JSON-RPC server listening on {}", local);
        if self.config.enable_websocket {
            info!("WebSocket JSON-RPC endpoint: ws://{}{}", local, self.config.ws_endpoint());
        }

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            debug!("New connection from {}", peer_addr);

            let handler = self.handler.clone();
            let read_timeout = self.config.read_timeout;
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle_request(req, peer_addr).await) }
                });

                let mut builder = http1::Builder::new();
                builder.timer(TokioTimer::new()).header_read_timeout(read_timeout);
                if let Err(err) = builder.serve_connection(io, service).with_upgrades().await {
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("Client disconnected: {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }

        info!("HTTP JSON-RPC server on {} stopped", local);
        Ok(())
    }

    /// Stop accepting connections and close every open RPC connection
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.rpc.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_body_size, 5 * 1024 * 1024);
        assert_eq!(config.ws_endpoint(), "/");
        assert!(!config.enable_websocket);
    }

    #[test]
    fn test_builder() {
        let server = HttpRpcServer::builder()
            .bind_address("0.0.0.0:9000".parse().unwrap())
            .rpc_path("/rpc")
            .websocket(true)
            .ws_path("/ws")
            .ws_origins(vec!["*".to_string()])
            .max_body_size(1024)
            .build();
        let config = server.config();
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.rpc_path, "/rpc");
        assert_eq!(config.ws_endpoint(), "/ws");
        assert_eq!(config.max_body_size, 1024);
        assert!(server.rpc().is_running());
    }

    #[tokio::test]
    async fn test_stop_ends_accept_loop() {
        let server = Arc::new(HttpRpcServer::builder().build());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let srv = server.clone();
        let serving = tokio::spawn(async move { srv.serve(listener).await });

        server.stop().await;
        serving.await.unwrap().unwrap();
        assert!(!server.rpc().is_running());
    }
}
