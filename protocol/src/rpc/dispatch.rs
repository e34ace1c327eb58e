//! # Dispatcher — Method Table & Handler Isolation
//!
//! Maps method names to async handlers and runs each invocation on its
//! own task. The task boundary is the isolation mechanism: a handler
//! that returns an error or outright panics produces a fault for its
//! one request and nothing else.
//!
//! Registration is last-write-wins. Re-registering a method name
//! replaces the previous handler, which is what a node swapping in new
//! application logic wants.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use super::wire::WireFault;

/// An application-level handler failure. The message crosses the wire
/// inside the fault envelope; keep secrets out of it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

type Handler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, HandlerError>> + Send + Sync>;

/// A concurrent method table.
///
/// Shared by `Arc` between the registering side (application setup) and
/// the invoking side (server connection loops). Methods can be added
/// while the server is live.
#[derive(Default)]
pub struct Dispatcher {
    handlers: DashMap<String, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `method`, replacing any previous
    /// handler with that name.
    pub fn register<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<u8>, HandlerError>> + Send + 'static,
    {
        let wrapped: Handler = Arc::new(move |payload| handler(payload).boxed());
        if self.handlers.insert(method.to_string(), wrapped).is_some() {
            debug!(method, "handler replaced");
        } else {
            debug!(method, "handler registered");
        }
    }

    /// Names of all registered methods, unordered.
    pub fn methods(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    /// Invokes the handler for `method` on a fresh task and waits for
    /// its outcome.
    ///
    /// Unknown methods and handler failures come back as [`WireFault`]s
    /// — request-scoped by construction. A panicking handler takes down
    /// its task, not the caller.
    pub async fn dispatch(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, WireFault> {
        let handler = match self.handlers.get(method) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                debug!(method, "unknown method");
                return Err(WireFault::MethodNotFound {
                    method: method.to_string(),
                });
            }
        };

        match tokio::spawn(handler(payload)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(WireFault::Handler { message: e.message }),
            Err(join_err) => {
                warn!(method, "handler panicked");
                let message = if join_err.is_panic() {
                    format!("handler for '{method}' panicked")
                } else {
                    format!("handler for '{method}' was cancelled")
                };
                Err(WireFault::Handler { message })
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods())
            .finish()
    }
}
