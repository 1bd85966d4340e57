//! End-to-end tests of the WebSocket endpoint

mod common;

use common::{init_tracing, start_http, test_server, test_server_with};
use ethrpc_client::{BatchElem, Client, ClientConfig, ClientError, WsHandshakeError};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

fn ws_url(addr: std::net::SocketAddr) -> String {
    format!("ws://{addr}/")
}

#[tokio::test]
async fn test_origin_allow_list() {
    init_tracing();
    let (server, addr) = start_http(test_server(), |b| {
        b.websocket(true).ws_origins(vec!["http://example.com".to_string()])
    })
    .await;

    let allowed = ClientConfig::default().with_ws_origin("http://example.com");
    let client = Client::dial_with_config(&ws_url(addr), allowed).await.unwrap();
    let ok: String = client.call("test_noArgs", ()).await.unwrap();
    assert_eq!(ok, "ok");

    let rejected = ClientConfig::default().with_ws_origin("http://evil.com");
    match Client::dial_with_config(&ws_url(addr), rejected).await.unwrap_err() {
        ClientError::WsHandshake(WsHandshakeError { status, .. }) => assert_eq!(status, Some(403)),
        other => panic!("unexpected error: {other:?}"),
    }

    // Non-browser clients send no Origin and are always accepted.
    let client = Client::dial(&ws_url(addr)).await.unwrap();
    let transport: String = client.call("test_peerTransport", ()).await.unwrap();
    assert_eq!(transport, "ws");
    server.stop().await;
}

#[tokio::test]
async fn test_wildcard_origin() {
    init_tracing();
    let (server, addr) = start_http(test_server(), |b| b.websocket(true).ws_origins(vec!["*".to_string()])).await;
    let config = ClientConfig::default().with_ws_origin("http://anything.example");
    let client = Client::dial_with_config(&ws_url(addr), config).await.unwrap();
    let sum: i64 = client.call("test_add", (20, 22)).await.unwrap();
    assert_eq!(sum, 42);
    server.stop().await;
}

#[tokio::test]
async fn test_websocket_on_separate_path() {
    init_tracing();
    let (server, addr) = start_http(test_server(), |b| b.websocket(true).ws_path("/ws")).await;

    let client = Client::dial(&format!("ws://{addr}/ws")).await.unwrap();
    let ok: String = client.call("test_noArgs", ()).await.unwrap();
    assert_eq!(ok, "ok");

    // Plain HTTP still works on the RPC path.
    let http = Client::dial(&format!("http://{addr}/")).await.unwrap();
    let ok: String = http.call("test_noArgs", ()).await.unwrap();
    assert_eq!(ok, "ok");
    server.stop().await;
}

#[tokio::test]
async fn test_subscription_over_websocket() {
    init_tracing();
    let (server, addr) = start_http(test_server(), |b| b.websocket(true)).await;
    let client = Client::dial(&ws_url(addr)).await.unwrap();

    let (tx, mut rx) = mpsc::channel::<u64>(8);
    let sub = client.subscribe("test", tx, "count", (500,)).await.unwrap();
    for i in 0..500 {
        assert_eq!(rx.recv().await, Some(i));
    }
    sub.unsubscribe().await;
    sub.unsubscribe().await;
    assert!(sub.err().await.is_none());

    let mut batch = vec![
        BatchElem::new("test_add", (1, 2)).unwrap(),
        BatchElem::new("test_add", (3, 4)).unwrap(),
    ];
    client.batch_call(&mut batch).await.unwrap();
    let sums: Vec<i64> = batch.into_iter().map(|e| e.decode().unwrap()).collect();
    assert_eq!(sums, vec![3, 7]);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unsubscribe_reaches_server_once() {
    init_tracing();
    let (unsub_tx, mut unsub_rx) = mpsc::unbounded_channel();
    let (server, addr) = start_http(test_server_with(Some(unsub_tx)), |b| b.websocket(true)).await;
    let client = Client::dial(&ws_url(addr)).await.unwrap();

    let (tx, mut rx) = mpsc::channel::<u64>(1);
    let sub = client.subscribe("test", tx, "flood", (3,)).await.unwrap();
    for i in 0..3 {
        assert_eq!(rx.recv().await, Some(i));
    }

    let (a, b) = tokio::join!(sub.unsubscribe(), sub.unsubscribe());
    let _ = (a, b);
    sub.unsubscribe().await;

    let id = tokio::time::timeout(Duration::from_secs(5), unsub_rx.recv()).await.unwrap().unwrap();
    assert_eq!(&id, sub.id());
    assert!(tokio::time::timeout(Duration::from_millis(200), unsub_rx.recv()).await.is_err());

    // A second server-side unsubscribe for the same id is rejected.
    let err = client
        .call::<bool>("test_unsubscribe", (sub.id(),))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rpc(_)));
    server.stop().await;
}

#[tokio::test]
async fn test_server_stop_ends_subscriptions() {
    init_tracing();
    let (server, addr) = start_http(test_server(), |b| b.websocket(true)).await;
    let client = Client::dial(&ws_url(addr)).await.unwrap();

    let (tx, _rx) = mpsc::channel::<u64>(1);
    let sub = client.subscribe("test", tx, "count", (0,)).await.unwrap();
    server.stop().await;

    let err = tokio::time::timeout(Duration::from_secs(5), sub.err()).await.unwrap();
    assert!(matches!(err.as_deref(), Some(ClientError::ConnectionClosed(_))));
    assert!(client.call::<Value>("test_noArgs", ()).await.is_err());
}

#[tokio::test]
async fn test_unknown_subscription_name() {
    init_tracing();
    let (server, addr) = start_http(test_server(), |b| b.websocket(true)).await;
    let client = Client::dial(&ws_url(addr)).await.unwrap();

    let (tx, _rx) = mpsc::channel::<u64>(1);
    let err = client.subscribe("test", tx, "nothing", ()).await.unwrap_err();
    assert_eq!(err.error_code(), Some(ethrpc_json_rpc::error_codes::METHOD_NOT_FOUND));
    server.stop().await;
}
