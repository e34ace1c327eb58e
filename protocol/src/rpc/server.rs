//! # RpcServer — Listener & Connection Loops
//!
//! Binds under a node keypair and serves framed request/response
//! traffic. Each connection gets a reader loop and a writer task joined
//! by a bounded channel; each request gets its own dispatch task, so
//! responses leave in completion order and one slow handler never holds
//! up the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config;
use crate::framing::{self, FrameError};
use crate::identity::{WeftKeypair, WeftPublicKey};

use super::dispatch::Dispatcher;
use super::wire::{Hello, Request, Response};
use super::RpcError;

/// A listening RPC endpoint.
///
/// The endpoint's identity is the keypair it was started with; every
/// accepted connection is greeted with a [`Hello`] carrying its public
/// key, which is what clients verify against the key they resolved.
pub struct RpcServer {
    public_key: WeftPublicKey,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    accept_task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl RpcServer {
    /// Binds `addr` and starts serving `dispatcher` under `keypair`'s
    /// identity. Bind port 0 to let the OS choose;
    /// [`local_addr`](Self::local_addr) reports the result.
    pub async fn listen(
        keypair: &WeftKeypair,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let public_key = keypair.public_key();
        let key_bytes = keypair.public_key_bytes();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let conn_dispatcher = Arc::clone(&dispatcher);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let dispatcher = Arc::clone(&conn_dispatcher);
                        let shutdown = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                serve_connection(stream, key_bytes, dispatcher, shutdown).await
                            {
                                debug!(peer = %peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        });

        info!(addr = %local_addr, public_key = %public_key, "rpc server listening");
        Ok(Self {
            public_key,
            local_addr,
            dispatcher,
            accept_task,
            shutdown_tx,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The identity this endpoint serves under.
    pub fn public_key(&self) -> &WeftPublicKey {
        &self.public_key
    }

    /// The method table backing this endpoint. Methods registered here
    /// become callable immediately, including on live connections.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Stops accepting connections and winds down established ones.
    /// Clients with calls in flight observe a lost connection.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        let _ = self.shutdown_tx.send(true);
        info!(addr = %self.local_addr, "rpc server shut down");
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.shutdown_tx.send(true);
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("public_key", &self.public_key)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// One connection: greet, then loop requests until clean EOF.
///
/// Each request is dispatched on its own task and its response fed to
/// the single writer task, so wire writes never interleave and the read
/// loop is back to the socket immediately.
async fn serve_connection(
    stream: TcpStream,
    public_key: [u8; 32],
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), FrameError> {
    let (mut reader, mut writer) = stream.into_split();

    framing::write_frame(&mut writer, &Hello::for_key(public_key)).await?;

    let (resp_tx, mut resp_rx) = mpsc::channel::<Response>(config::OUTBOUND_QUEUE_CAPACITY);
    let writer_task = tokio::spawn(async move {
        while let Some(resp) = resp_rx.recv().await {
            if let Err(e) = framing::write_frame(&mut writer, &resp).await {
                debug!(error = %e, "response write failed");
                break;
            }
        }
    });

    loop {
        let req = tokio::select! {
            _ = shutdown.wait_for(|s| *s) => break,
            frame = framing::read_frame::<_, Request>(&mut reader) => match frame? {
                Some(req) => req,
                None => break,
            },
        };
        let dispatcher = Arc::clone(&dispatcher);
        let resp_tx = resp_tx.clone();
        tokio::spawn(async move {
            let Request { id, method, payload } = req;
            let outcome = dispatcher.dispatch(&method, payload).await;
            // A send failure means the connection is already gone.
            let _ = resp_tx.send(Response { id, outcome }).await;
        });
    }

    // Dropping our sender lets the writer drain in-flight responses for
    // requests that will never be answered anyway, then exit.
    drop(resp_tx);
    writer_task.abort();
    Ok(())
}
