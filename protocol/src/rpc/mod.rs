//! # RPC Module
//!
//! Request/response messaging between WEFT identities.
//!
//! A server binds a TCP listener under its keypair and greets every
//! connection with a handshake frame carrying its public key; a client
//! resolves that key through the [directory](crate::directory), connects,
//! and verifies the greeting before sending anything. After the
//! handshake, the connection carries length-prefixed request and response
//! frames with opaque byte payloads — the RPC layer moves bytes, callers
//! pick the encoding.
//!
//! ```text
//! wire.rs     — handshake, request, response frame types
//! dispatch.rs — Dispatcher: method table, handler isolation
//! server.rs   — RpcServer: listener, per-connection loops
//! client.rs   — RpcClient: connect, correlate, timeout
//! ```
//!
//! ## Design Decisions
//!
//! - Requests on one connection execute concurrently; responses return
//!   in completion order, correlated by request id. A slow handler never
//!   queues behind a fast one.
//! - A handler failure (or panic) faults that one request. The
//!   connection, the server, and every other in-flight request carry on.
//! - Timeouts are the caller's: [`RpcClient::call`] takes a deadline and
//!   gives up locally when it passes. An expired call says nothing about
//!   whether the server executed the handler.

mod client;
mod dispatch;
mod server;
pub(crate) mod wire;

pub use client::RpcClient;
pub use dispatch::{Dispatcher, HandlerError};
pub use server::RpcServer;

use crate::directory::DirectoryError;
use crate::framing::FrameError;

/// Errors surfaced by RPC clients and servers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The server has no handler registered under the requested method.
    #[error("remote method not found: {method}")]
    MethodNotFound { method: String },

    /// The remote handler ran and failed (or panicked).
    #[error("remote handler failed: {message}")]
    Handler { message: String },

    /// The caller's deadline passed before a response arrived. The
    /// request may or may not have executed on the server.
    #[error("call to '{method}' timed out")]
    Timeout { method: String },

    /// The transport dropped while requests were in flight.
    #[error("connection lost")]
    ConnectionLost,

    /// The endpoint was closed locally; in-flight and subsequent calls
    /// fail with this.
    #[error("endpoint closed")]
    Closed,

    /// The peer's greeting was missing, malformed, or claimed an
    /// identity other than the one we dialed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Peer resolution failed before a connection was attempted.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Frame-level transport failure.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Listener-level I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
