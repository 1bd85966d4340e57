//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use ethrpc_http_server::{HttpRpcServer, HttpRpcServerBuilder};
use ethrpc_json_rpc::prelude::*;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoResult {
    pub string: String,
    pub int: i64,
    pub args: Option<Vec<String>>,
}

fn subscription_error(e: impl std::fmt::Display) -> RpcError {
    RpcError::InvalidRequest(e.to_string())
}

/// The `test` service used throughout: plain calls, a panicking method,
/// a slow method and two subscriptions.
pub fn test_service(unsubscribed: Option<mpsc::UnboundedSender<SubscriptionId>>) -> ServiceBuilder {
    let unsubscribed = Arc::new(unsubscribed);
    ServiceBuilder::new()
        .infallible("echo", |_ctx, (string, int, args): (String, i64, Option<Vec<String>>)| async move {
            EchoResult { string, int, args }
        })
        .function("add", |(a, b): (i64, i64)| async move { Ok::<_, RpcError>(a + b) })
        .infallible("noArgs", |_ctx, ()| async { "ok" })
        .method("fail", |_ctx, ()| async {
            Err::<(), _>(JsonRpcErrorObject::new(-32042, "custom failure", Some(serde_json::json!({"why": "test"}))))
        })
        .infallible("crash", |_ctx, ()| async {
            if true {
                panic!("method crashed on purpose");
            }
            0
        })
        .infallible("peerTransport", |ctx: CallContext, ()| async move { ctx.peer_info().transport.clone() })
        .infallible("sleep", |ctx: CallContext, (ms,): (u64,)| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
                _ = ctx.cancelled() => false,
            }
        })
        // Sends `count` values, all before the subscription id is delivered.
        .subscription("count", |ctx: CallContext, (count,): (u64,)| async move {
            let notifier = ctx.notifier().cloned().ok_or(RpcError::NotificationsUnsupported)?;
            let sub = notifier.create_subscription().map_err(subscription_error)?;
            for i in 0..count {
                notifier.notify(&sub.id, &i).await.map_err(subscription_error)?;
            }
            Ok::<Subscription, RpcError>(sub)
        })
        // Sends `count` values from a background task, then waits for the
        // subscription to end and reports unsubscribes.
        .subscription("flood", move |ctx: CallContext, (count,): (u64,)| {
            let unsubscribed = unsubscribed.clone();
            async move {
                let notifier = ctx.notifier().cloned().ok_or(RpcError::NotificationsUnsupported)?;
                let sub = notifier.create_subscription().map_err(subscription_error)?;
                let handle = sub.clone();
                tokio::spawn(async move {
                    for i in 0..count {
                        if notifier.notify(&handle.id, &i).await.is_err() {
                            break;
                        }
                    }
                    if handle.err().await.is_none()
                        && let Some(tx) = unsubscribed.as_ref()
                    {
                        let _ = tx.send(handle.id.clone());
                    }
                });
                Ok::<Subscription, RpcError>(sub)
            }
        })
}

pub fn test_server() -> Arc<Server> {
    test_server_with(None)
}

pub fn test_server_with(unsubscribed: Option<mpsc::UnboundedSender<SubscriptionId>>) -> Arc<Server> {
    let server = Arc::new(Server::new());
    server
        .register_name("test", test_service(unsubscribed))
        .expect("test service registers");
    server
}

/// Start an HTTP endpoint on an ephemeral port.
pub async fn start_http(
    rpc: Arc<Server>,
    configure: impl FnOnce(HttpRpcServerBuilder) -> HttpRpcServerBuilder,
) -> (Arc<HttpRpcServer>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = Arc::new(configure(HttpRpcServer::builder().rpc_server(rpc)).build());
    tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });
    (server, addr)
}
