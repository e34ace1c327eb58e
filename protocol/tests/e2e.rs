//! End-to-end tests for the WEFT substrate: storage, identity,
//! discovery, and RPC assembled the way a real node assembles them.
//!
//! Every test runs a genuine bootstrap registry and real TCP sockets on
//! loopback. No mocks — if the layers don't compose, these fail.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use weft_protocol::directory::{DirectoryConfig, PeerDirectory, Registry};
use weft_protocol::identity::{IdentityStore, WeftKeypair};
use weft_protocol::rpc::{Dispatcher, HandlerError, RpcClient, RpcError, RpcServer};
use weft_protocol::storage::LogStore;

#[derive(Debug, Serialize, Deserialize)]
struct PingPayload {
    nonce: u64,
}

/// A node as the binary assembles one: persistent store, seed-derived
/// identity, joined directory, listening server.
struct TestNode {
    keypair: WeftKeypair,
    server: RpcServer,
    directory: Arc<PeerDirectory>,
    store: Arc<LogStore>,
}

async fn start_node(data_dir: &std::path::Path, bootstrap: SocketAddr) -> TestNode {
    let store = Arc::new(LogStore::open(data_dir).unwrap());
    let ids = IdentityStore::new(Arc::clone(&store));
    let dht_keypair = ids.resolve_keypair("dht").unwrap();
    let rpc_keypair = ids.resolve_keypair("rpc").unwrap();

    let directory = PeerDirectory::join(DirectoryConfig::with_bootstrap(bootstrap), &dht_keypair)
        .await
        .unwrap();

    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register("ping", |payload| async move {
        let ping: PingPayload =
            serde_json::from_slice(&payload).map_err(|e| HandlerError::new(e.to_string()))?;
        let pong = PingPayload {
            nonce: ping.nonce + 1,
        };
        Ok(serde_json::to_vec(&pong).unwrap())
    });

    let server = RpcServer::listen(&rpc_keypair, "127.0.0.1:0".parse().unwrap(), dispatcher)
        .await
        .unwrap();
    directory
        .announce(server.public_key(), server.local_addr().port())
        .await
        .unwrap();

    TestNode {
        keypair: rpc_keypair,
        server,
        directory,
        store,
    }
}

#[tokio::test]
async fn ping_end_to_end_through_discovery() {
    let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(dir.path(), registry.local_addr()).await;

    // The client knows only the server's public key, as handed out
    // out-of-band; the route comes from the directory.
    let client_kp = WeftKeypair::generate();
    let client_dir = PeerDirectory::join(
        DirectoryConfig::with_bootstrap(registry.local_addr()),
        &client_kp,
    )
    .await
    .unwrap();
    let client = RpcClient::connect(&client_dir, &node.keypair.public_key())
        .await
        .unwrap();

    let payload = serde_json::to_vec(&PingPayload { nonce: 126 }).unwrap();
    let resp = client.request("ping", payload).await.unwrap();
    let pong: PingPayload = serde_json::from_slice(&resp).unwrap();
    assert_eq!(pong.nonce, 127);
}

#[tokio::test]
async fn restart_preserves_published_identity() {
    let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let first_key = {
        let node = start_node(dir.path(), registry.local_addr()).await;
        let key = node.keypair.public_key();
        node.server.shutdown();
        node.directory.close();
        key
    };

    // Same store directory, fresh process state.
    let node = start_node(dir.path(), registry.local_addr()).await;
    assert_eq!(node.keypair.public_key(), first_key);

    // And the old key still resolves and answers.
    let client_kp = WeftKeypair::generate();
    let client_dir = PeerDirectory::join(
        DirectoryConfig::with_bootstrap(registry.local_addr()),
        &client_kp,
    )
    .await
    .unwrap();
    let client = RpcClient::connect(&client_dir, &first_key).await.unwrap();
    let payload = serde_json::to_vec(&PingPayload { nonce: 0 }).unwrap();
    let resp = client.request("ping", payload).await.unwrap();
    let pong: PingPayload = serde_json::from_slice(&resp).unwrap();
    assert_eq!(pong.nonce, 1);
}

#[tokio::test]
async fn failing_handler_does_not_disturb_concurrent_call() {
    let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(dir.path(), registry.local_addr()).await;

    node.server
        .dispatcher()
        .register("always-fails", |_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(HandlerError::new("deliberate failure"))
        });
    node.server.dispatcher().register("steady", |_| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(b"ok".to_vec())
    });

    let client = Arc::new(
        RpcClient::connect_addr(node.server.local_addr(), &node.keypair.public_key())
            .await
            .unwrap(),
    );

    let failing = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.request("always-fails", vec![]).await })
    };
    let steady = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.request("steady", vec![]).await })
    };

    let err = failing.await.unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Handler { ref message } if message == "deliberate failure"));
    assert_eq!(steady.await.unwrap().unwrap(), b"ok".to_vec());
}

#[tokio::test]
async fn unknown_method_then_valid_call_on_same_connection() {
    let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(dir.path(), registry.local_addr()).await;

    let client = RpcClient::connect_addr(node.server.local_addr(), &node.keypair.public_key())
        .await
        .unwrap();

    let err = client.request("definitely-not-a-method", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound { .. }));

    let payload = serde_json::to_vec(&PingPayload { nonce: 10 }).unwrap();
    let resp = client.request("ping", payload).await.unwrap();
    let pong: PingPayload = serde_json::from_slice(&resp).unwrap();
    assert_eq!(pong.nonce, 11);
}

#[tokio::test]
async fn timed_out_call_may_still_have_executed() {
    let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(dir.path(), registry.local_addr()).await;

    let store = Arc::clone(&node.store);
    node.server.dispatcher().register("slow-write", move |payload| {
        let store = Arc::clone(&store);
        async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            store
                .append("slow/record", &payload)
                .map_err(|e| HandlerError::new(e.to_string()))?;
            Ok(vec![])
        }
    });

    let client = RpcClient::connect_addr(node.server.local_addr(), &node.keypair.public_key())
        .await
        .unwrap();

    let err = client
        .call("slow-write", b"late".to_vec(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));

    // The timeout was local; the server finished the work anyway.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(node.store.get("slow/record"), Some(b"late".to_vec()));
}
