use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::SharedCodec;
use crate::constants::METADATA_API;
use crate::error::{CloseReason, RegistryError, RpcError};
use crate::handler::Handler;
use crate::message::error_message;
use crate::metrics::{self, MetricsSink};
use crate::registry::{RpcService, ServiceBuilder, ServiceRegistry};
use crate::types::{IdGenerator, random_id_generator};

/// Builder for [`Server`]
pub struct ServerBuilder {
    id_gen: IdGenerator,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            id_gen: random_id_generator(),
            metrics: metrics::noop(),
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_generator(mut self, id_gen: IdGenerator) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Server {
        let services = Arc::new(ServiceRegistry::new());
        let weak = Arc::downgrade(&services);
        let metadata = ServiceBuilder::new().infallible("modules", move |_ctx, ()| {
            let modules = weak.upgrade().map(|r| r.modules()).unwrap_or_default();
            async move { modules }
        });
        if let Err(e) = services.register_name(METADATA_API, metadata) {
            debug!(err = %e, "Failed to register metadata service");
        }
        Server {
            services,
            id_gen: self.id_gen,
            metrics: self.metrics,
            run: AtomicBool::new(true),
            codecs: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }
}

/// An RPC server: a service registry plus the set of connections being served.
pub struct Server {
    services: Arc<ServiceRegistry>,
    id_gen: IdGenerator,
    metrics: Arc<dyn MetricsSink>,
    run: AtomicBool,
    codecs: Mutex<HashMap<u64, SharedCodec>>,
    next_conn: AtomicU64,
    shutdown: CancellationToken,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// A server with the `rpc` metadata service registered
    pub fn new() -> Self {
        ServerBuilder::new().build()
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn register_name(&self, name: &str, service: ServiceBuilder) -> Result<(), RegistryError> {
        self.services.register_name(name, service)
    }

    pub fn register_service<S: RpcService>(&self, name: &str, service: Arc<S>) -> Result<(), RegistryError> {
        self.services.register_service(name, service)
    }

    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::SeqCst)
    }

    /// Cancelled once [`Server::stop`] has been called
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn new_handler(&self, codec: SharedCodec) -> Handler {
        Handler::new(
            codec,
            self.services.clone(),
            self.id_gen.clone(),
            self.metrics.clone(),
        )
    }

    fn track(&self, codec: &SharedCodec) -> Option<u64> {
        let mut codecs = self.codecs.lock();
        if !self.is_running() {
            return None;
        }
        let key = self.next_conn.fetch_add(1, Ordering::Relaxed);
        codecs.insert(key, codec.clone());
        Some(key)
    }

    /// Serve a persistent connection until it closes. The codec is closed on return.
    pub async fn serve_codec(&self, codec: SharedCodec) {
        let Some(key) = self.track(&codec) else {
            codec.close().await;
            return;
        };
        let remote = codec.remote_addr();
        debug!(conn = %remote, "Serving RPC connection");

        let handler = Arc::new(self.new_handler(codec.clone()));
        let reason = handler.serve().await;
        codec.close().await;
        handler.close(reason, None).await;

        self.codecs.lock().remove(&key);
        debug!(conn = %remote, "RPC connection closed");
    }

    /// Serve exactly one request (or batch) read from `codec`, without subscription support.
    pub async fn serve_single_request(&self, codec: SharedCodec) {
        if !self.is_running() {
            return;
        }
        let handler = Arc::new(self.new_handler(codec.clone()).allow_subscribe(false));
        match codec.read_batch().await {
            Ok((msgs, true)) => handler.handle_batch(msgs).await,
            Ok((mut msgs, false)) => {
                if let Some(msg) = msgs.pop() {
                    handler.handle_msg(msg).await;
                }
            }
            Err(err) => {
                if !err.is_eof() {
                    let resp = error_message(&RpcError::InvalidMessage("parse error".to_string()));
                    if let Err(e) = codec.write_json(&resp.into(), None).await {
                        debug!(err = %e, "Failed to write parse error");
                    }
                }
            }
        }
        handler.drain().await;
        handler.close(CloseReason::Eof, None).await;
    }

    /// Stop accepting work and close every open connection. Only the first call has an effect.
    pub async fn stop(&self) {
        if self
            .run
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        info!("RPC server shutting down");
        self.shutdown.cancel();
        let codecs: Vec<SharedCodec> = self.codecs.lock().values().cloned().collect();
        futures::future::join_all(codecs.iter().map(|codec| codec.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ServerCodec, inproc};
    use crate::message::{JsonRpcMessage, parse_message};
    use serde_json::{Value, json};

    async fn call(codec: &inproc::InProcCodec, raw: &str) -> Value {
        let (mut msgs, _) = parse_message(raw.as_bytes());
        let msg: JsonRpcMessage = msgs.remove(0);
        codec.write_json(&msg.into(), None).await.unwrap();
        let (msgs, _) = codec.read_batch().await.unwrap();
        serde_json::from_str(&msgs[0].to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_rpc_modules() {
        let server = Arc::new(Server::new());
        server
            .register_name("eth", ServiceBuilder::new().infallible("chainId", |_ctx, ()| async { "0x1" }))
            .unwrap();

        let (a, b) = inproc::pipe();
        let srv = server.clone();
        let serving = tokio::spawn(async move { srv.serve_codec(Arc::new(a)).await });

        let resp = call(&b, r#"{"jsonrpc":"2.0","id":1,"method":"rpc_modules"}"#).await;
        assert_eq!(resp["result"], json!({"eth": "1.0", "rpc": "1.0"}));

        server.stop().await;
        serving.await.unwrap();
        assert!(!server.is_running());
        assert!(b.read_batch().await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_rejects_new_connections() {
        let server = Server::new();
        server.stop().await;
        server.stop().await;
        assert!(server.shutdown_token().is_cancelled());

        let (a, _b) = inproc::pipe();
        let a = Arc::new(a);
        server.serve_codec(a.clone()).await;
        assert!(a.closed().is_cancelled());
    }

    #[tokio::test]
    async fn test_parse_error_is_reported_and_connection_closed() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let server = Arc::new(Server::new());
        let (a, mut raw) = tokio::io::duplex(1024);
        let codec = Arc::new(crate::codec::JsonCodec::new(
            a,
            crate::types::PeerInfo::new("ipc", "test"),
        ));
        let srv = server.clone();
        let serving = tokio::spawn(async move { srv.serve_codec(codec).await });

        raw.write_all(b"{\"jsonrpc\": ]").await.unwrap();
        let mut out = String::new();
        raw.read_to_string(&mut out).await.unwrap();
        serving.await.unwrap();

        let resp: Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(resp["id"], Value::Null);
        assert_eq!(resp["error"]["code"], -32700);
    }
}
