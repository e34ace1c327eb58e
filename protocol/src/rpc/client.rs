//! # RpcClient — Connect, Correlate, Timeout
//!
//! The calling side of an RPC connection. A client dials an identity,
//! not an address: the directory resolves the public key to a route,
//! and the server's greeting is checked against that key before any
//! request leaves.
//!
//! Calls are correlated by id through a pending map, so any number of
//! calls can be in flight on one connection and responses can arrive in
//! any order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config;
use crate::directory::PeerDirectory;
use crate::framing;
use crate::identity::WeftPublicKey;

use super::wire::{Hello, Request, Response, WireFault};
use super::RpcError;

type PendingMap = DashMap<u64, oneshot::Sender<Result<Vec<u8>, WireFault>>>;

/// A verified connection to one remote identity.
pub struct RpcClient {
    server_key: WeftPublicKey,
    outbound: mpsc::Sender<Request>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl RpcClient {
    /// Resolves `target` through the directory and connects to it.
    pub async fn connect(
        directory: &PeerDirectory,
        target: &WeftPublicKey,
    ) -> Result<Self, RpcError> {
        let route = directory.lookup(target).await?;
        Self::connect_addr(route, target).await
    }

    /// Connects to a known route, still verifying that the peer greets
    /// as `target`.
    pub async fn connect_addr(
        addr: SocketAddr,
        target: &WeftPublicKey,
    ) -> Result<Self, RpcError> {
        let stream = tokio::time::timeout(config::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::Handshake("connect timed out".into()))??;
        let (mut reader, mut writer) = stream.into_split();

        let hello: Hello = framing::read_frame(&mut reader)
            .await?
            .ok_or_else(|| RpcError::Handshake("peer hung up before greeting".into()))?;
        if hello.magic != config::PROTOCOL_MAGIC {
            return Err(RpcError::Handshake(format!(
                "bad magic 0x{:08x}",
                hello.magic
            )));
        }
        if hello.version != config::WIRE_PROTOCOL_VERSION {
            return Err(RpcError::Handshake(format!(
                "wire version {} (ours is {})",
                hello.version,
                config::WIRE_PROTOCOL_VERSION
            )));
        }
        if &hello.public_key != target.as_bytes() {
            return Err(RpcError::Handshake(
                "peer identity does not match the key we dialed".into(),
            ));
        }

        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let (outbound, mut outbound_rx) = mpsc::channel::<Request>(config::OUTBOUND_QUEUE_CAPACITY);
        let writer_task = tokio::spawn(async move {
            while let Some(req) = outbound_rx.recv().await {
                if let Err(e) = framing::write_frame(&mut writer, &req).await {
                    debug!(error = %e, "request write failed");
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_task = tokio::spawn(async move {
            loop {
                match framing::read_frame::<_, Response>(&mut reader).await {
                    Ok(Some(resp)) => {
                        if let Some((_, tx)) = reader_pending.remove(&resp.id) {
                            let _ = tx.send(resp.outcome);
                        } else {
                            debug!(id = resp.id, "response for unknown or expired request");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "response read failed");
                        break;
                    }
                }
            }
            // Dropping the senders wakes every in-flight call with a
            // recv error, which they report as ConnectionLost.
            reader_pending.clear();
        });

        info!(server = %target, addr = %addr, "rpc connection established");
        Ok(Self {
            server_key: target.clone(),
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader_task,
            writer_task,
        })
    }

    /// The identity on the other end.
    pub fn server_key(&self) -> &WeftPublicKey {
        &self.server_key
    }

    /// Invokes `method` with `payload` and waits up to `timeout` for
    /// the response.
    ///
    /// An expired timeout fails the call locally; whether the server
    /// executed the handler is deliberately unknowable from here.
    pub async fn call(
        &self,
        method: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let req = Request {
            id,
            method: method.to_string(),
            payload,
        };
        if self.outbound.send(req).await.is_err() {
            self.pending.remove(&id);
            return Err(self.disconnect_error());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(bytes))) => Ok(bytes),
            Ok(Ok(Err(WireFault::MethodNotFound { method }))) => {
                Err(RpcError::MethodNotFound { method })
            }
            Ok(Ok(Err(WireFault::Handler { message }))) => Err(RpcError::Handler { message }),
            // Sender dropped: the reader drained pending, or close()
            // did. The flag says which.
            Ok(Err(_)) => Err(self.disconnect_error()),
            Err(_) => {
                self.pending.remove(&id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Shorthand for [`call`](Self::call) with
    /// [`config::DEFAULT_CALL_TIMEOUT`].
    pub async fn request(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        self.call(method, payload, config::DEFAULT_CALL_TIMEOUT).await
    }

    /// Closes the connection. In-flight calls fail with
    /// [`RpcError::Closed`]; so does everything after.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reader_task.abort();
        self.writer_task.abort();
        self.pending.clear();
        info!(server = %self.server_key, "rpc connection closed");
    }

    fn disconnect_error(&self) -> RpcError {
        if self.closed.load(Ordering::Acquire) {
            RpcError::Closed
        } else {
            RpcError::ConnectionLost
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("server_key", &self.server_key)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::WeftKeypair;
    use crate::rpc::{Dispatcher, HandlerError, RpcServer};

    async fn echo_server() -> (RpcServer, WeftKeypair) {
        let kp = WeftKeypair::generate();
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.register("echo", |payload| async move { Ok(payload) });
        dispatcher.register("fail", |_| async { Err(HandlerError::new("nope")) });
        let server = RpcServer::listen(&kp, "127.0.0.1:0".parse().unwrap(), dispatcher)
            .await
            .unwrap();
        (server, kp)
    }

    #[tokio::test]
    async fn call_roundtrip() {
        let (server, kp) = echo_server().await;
        let client = RpcClient::connect_addr(server.local_addr(), &kp.public_key())
            .await
            .unwrap();

        let out = client.request("echo", vec![4, 5, 6]).await.unwrap();
        assert_eq!(out, vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_identity() {
        let (server, _kp) = echo_server().await;
        let imposter = WeftKeypair::generate();

        let err = RpcClient::connect_addr(server.local_addr(), &imposter.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Handshake(_)));
    }

    #[tokio::test]
    async fn faults_map_to_typed_errors() {
        let (server, kp) = echo_server().await;
        let client = RpcClient::connect_addr(server.local_addr(), &kp.public_key())
            .await
            .unwrap();

        let err = client.request("missing", vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            RpcError::MethodNotFound { ref method } if method == "missing"
        ));

        let err = client.request("fail", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Handler { ref message } if message == "nope"));

        // The connection survived both faults.
        let out = client.request("echo", vec![1]).await.unwrap();
        assert_eq!(out, vec![1]);
    }

    #[tokio::test]
    async fn timeout_is_local_and_bounded() {
        let (server, kp) = echo_server().await;
        server.dispatcher().register("glacial", |payload| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(payload)
        });

        let client = RpcClient::connect_addr(server.local_addr(), &kp.public_key())
            .await
            .unwrap();
        let err = client
            .call("glacial", vec![], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { ref method } if method == "glacial"));
        assert_eq!(client.pending.len(), 0, "timed-out call left a pending entry");
    }

    #[tokio::test]
    async fn close_fails_in_flight_and_later_calls() {
        let (server, kp) = echo_server().await;
        server.dispatcher().register("hang", |payload| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(payload)
        });

        let client = Arc::new(
            RpcClient::connect_addr(server.local_addr(), &kp.public_key())
                .await
                .unwrap(),
        );

        let in_flight = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client.call("hang", vec![], Duration::from_secs(30)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.close();
        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Closed));

        let err = client.request("echo", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Closed));
    }

    #[tokio::test]
    async fn server_death_surfaces_connection_lost() {
        let (server, kp) = echo_server().await;
        server.dispatcher().register("hang", |payload| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(payload)
        });
        let client = Arc::new(
            RpcClient::connect_addr(server.local_addr(), &kp.public_key())
                .await
                .unwrap(),
        );

        let in_flight = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client.call("hang", vec![], Duration::from_secs(30)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Dropping the server tears down its tasks and sockets.
        drop(server);

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ConnectionLost));
    }
}
