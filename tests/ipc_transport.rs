//! End-to-end tests over Unix-domain sockets
#![cfg(unix)]

mod common;

use common::{init_tracing, test_server};
use ethrpc_client::{Client, ClientConfig};
use ethrpc_json_rpc::ipc::ipc_listen;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_ipc_endpoint() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/dir/node.ipc");

    // A stale file at the socket path is replaced.
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"stale").unwrap();

    let server = test_server();
    let listener = ipc_listen(&path).unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    tokio::spawn({
        let server = server.clone();
        async move { server.serve_listener(listener).await }
    });

    let client = Client::dial(path.to_str().unwrap()).await.unwrap();
    let transport: String = client.call("test_peerTransport", ()).await.unwrap();
    assert_eq!(transport, "ipc");

    let (tx, mut rx) = mpsc::channel::<u64>(2);
    let sub = client.subscribe("test", tx, "count", (50,)).await.unwrap();
    for i in 0..50 {
        assert_eq!(rx.recv().await, Some(i));
    }
    sub.unsubscribe().await;

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_ipc_reconnect() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.ipc");

    let first = test_server();
    let listener = ipc_listen(&path).unwrap();
    tokio::spawn({
        let server = first.clone();
        async move { server.serve_listener(listener).await }
    });
    let client = Client::dial_ipc(&path, ClientConfig::default()).await.unwrap();
    let sum: i64 = client.call("test_add", (1, 1)).await.unwrap();
    assert_eq!(sum, 2);

    // The server goes away; the pending connection fails.
    first.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = test_server();
    let listener = ipc_listen(&path).unwrap();
    tokio::spawn({
        let server = second.clone();
        async move { server.serve_listener(listener).await }
    });

    // The next call dials the new server.
    let sum: i64 = client.call("test_add", (2, 2)).await.unwrap();
    assert_eq!(sum, 4);
    second.stop().await;
}
