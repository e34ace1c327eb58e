//! # Directory Module
//!
//! Peer discovery for WEFT. Nodes join a discovery network by contacting
//! one or more well-known bootstrap registries, announce their public
//! key together with a reachable port, and resolve other public keys to
//! network routes.
//!
//! ```text
//! mod.rs      — PeerDirectory: join / announce / lookup, lifecycle
//! registry.rs — Registry: the bootstrap node role (route table service)
//! ```
//!
//! ## Design Decisions
//!
//! - Discovery state is an explicit [`DirectoryConfig`] passed to
//!   [`PeerDirectory::join`], never ambient process globals — tests run
//!   several identities against one in-process registry.
//! - Lookups query the bootstrap set directly rather than routing
//!   iteratively through a peer mesh. For the private-network
//!   deployments WEFT targets (a handful of bootstrap contacts), the
//!   registry *is* the hash table; pretending otherwise would be
//!   ceremony.
//! - Every retry is bounded. Join backs off exponentially up to a cap,
//!   lookup makes a fixed number of passes, and both bail immediately
//!   once the directory is closed.

mod registry;

pub use registry::Registry;

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config;
use crate::framing::{self, FrameError};
use crate::identity::{WeftKeypair, WeftPublicKey};

// ---------------------------------------------------------------------------
// Wire Messages
// ---------------------------------------------------------------------------

/// Requests understood by a bootstrap registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum DirectoryRequest {
    /// Publish `public_key -> (announcer's IP, port)`.
    Announce { public_key: [u8; 32], port: u16 },
    /// Resolve a public key to a route.
    Lookup { public_key: [u8; 32] },
    /// Liveness probe used during join.
    Ping,
}

/// Registry replies, one per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum DirectoryResponse {
    Announced,
    Found { addr: SocketAddr },
    NotFound,
    Pong,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the discovery layer.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// No bootstrap contact answered within the bounded retry schedule.
    #[error("could not reach any bootstrap contact after {attempts} attempts")]
    Bootstrap { attempts: u32 },

    /// The target public key resolved nowhere after bounded attempts.
    #[error("peer unreachable: no route found after {attempts} attempts")]
    PeerUnreachable { attempts: u32 },

    /// The directory handle was closed; in-flight and subsequent
    /// operations fail with this.
    #[error("directory is closed")]
    Closed,

    /// A registry spoke something that isn't the directory protocol.
    #[error("unexpected registry response")]
    Protocol,

    /// Transport-level failure talking to a registry.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ---------------------------------------------------------------------------
// Configuration & Lifecycle
// ---------------------------------------------------------------------------

/// Bootstrap configuration for joining the discovery network.
///
/// An explicit value, constructed by the caller and passed to
/// [`PeerDirectory::join`]. Multiple directories with different configs
/// can coexist in one process.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Bootstrap registry contacts, tried in order.
    pub bootstrap: Vec<SocketAddr>,
}

impl DirectoryConfig {
    /// Config with a single bootstrap contact — the common case.
    pub fn with_bootstrap(addr: SocketAddr) -> Self {
        Self {
            bootstrap: vec![addr],
        }
    }
}

/// Lifecycle state of a [`PeerDirectory`].
///
/// `Joining` re-enters itself on transient bootstrap failure (with
/// backoff) until the attempt budget runs out. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryState {
    /// Contacting bootstrap registries.
    Joining,
    /// At least one bootstrap contact is reachable; announce and lookup
    /// are available.
    Ready,
    /// Closed by the owner. All operations fail with
    /// [`DirectoryError::Closed`].
    Closed,
}

// ---------------------------------------------------------------------------
// PeerDirectory
// ---------------------------------------------------------------------------

/// A handle into the discovery network.
///
/// Created by [`join`](Self::join) under a node keypair; used to
/// announce this node's RPC identity and to resolve remote identities
/// to routes. Cheap to share via `Arc`.
pub struct PeerDirectory {
    config: DirectoryConfig,
    public_key: WeftPublicKey,
    state: RwLock<DirectoryState>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl PeerDirectory {
    /// Joins the discovery network under `keypair`'s public identity.
    ///
    /// Tries every bootstrap contact per attempt; failed attempts back
    /// off exponentially from [`config::JOIN_BACKOFF_BASE`] up to
    /// [`config::JOIN_BACKOFF_CAP`], for at most
    /// [`config::JOIN_MAX_ATTEMPTS`] attempts. Never blocks indefinitely.
    pub async fn join(
        config: DirectoryConfig,
        keypair: &WeftKeypair,
    ) -> Result<Arc<Self>, DirectoryError> {
        let (closed_tx, closed_rx) = watch::channel(false);
        let dir = Self {
            config,
            public_key: keypair.public_key(),
            state: RwLock::new(DirectoryState::Joining),
            closed_tx,
            closed_rx,
        };

        let mut backoff = config::JOIN_BACKOFF_BASE;
        for attempt in 1..=config::JOIN_MAX_ATTEMPTS {
            for addr in dir.config.bootstrap.clone() {
                match dir.request(addr, DirectoryRequest::Ping).await {
                    Ok(DirectoryResponse::Pong) => {
                        *dir.state.write() = DirectoryState::Ready;
                        info!(
                            bootstrap = %addr,
                            public_key = %dir.public_key,
                            "joined discovery network"
                        );
                        return Ok(Arc::new(dir));
                    }
                    Ok(_) => return Err(DirectoryError::Protocol),
                    Err(DirectoryError::Closed) => return Err(DirectoryError::Closed),
                    Err(e) => {
                        debug!(bootstrap = %addr, attempt, error = %e, "bootstrap contact failed");
                    }
                }
            }
            if attempt < config::JOIN_MAX_ATTEMPTS {
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying bootstrap");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config::JOIN_BACKOFF_CAP);
            }
        }

        Err(DirectoryError::Bootstrap {
            attempts: config::JOIN_MAX_ATTEMPTS,
        })
    }

    /// Publishes `public_key -> (this host, port)` on every reachable
    /// bootstrap contact, making the key resolvable by other peers.
    ///
    /// Succeeds if at least one registry accepted the announcement.
    pub async fn announce(
        &self,
        public_key: &WeftPublicKey,
        port: u16,
    ) -> Result<(), DirectoryError> {
        self.ensure_open()?;

        let req = DirectoryRequest::Announce {
            public_key: *public_key.as_bytes(),
            port,
        };

        let mut accepted = 0u32;
        for addr in self.config.bootstrap.clone() {
            match self.request(addr, req.clone()).await {
                Ok(DirectoryResponse::Announced) => accepted += 1,
                Ok(_) => return Err(DirectoryError::Protocol),
                Err(DirectoryError::Closed) => return Err(DirectoryError::Closed),
                Err(e) => warn!(bootstrap = %addr, error = %e, "announce failed on contact"),
            }
        }

        if accepted == 0 {
            return Err(DirectoryError::Bootstrap {
                attempts: self.config.bootstrap.len() as u32,
            });
        }
        info!(public_key = %public_key, port, registries = accepted, "announced");
        Ok(())
    }

    /// Resolves a remote public key to a reachable route.
    ///
    /// Makes up to [`config::LOOKUP_MAX_ATTEMPTS`] passes over the
    /// bootstrap set with a short growing delay between passes, then
    /// surfaces [`DirectoryError::PeerUnreachable`].
    pub async fn lookup(&self, target: &WeftPublicKey) -> Result<SocketAddr, DirectoryError> {
        let req = DirectoryRequest::Lookup {
            public_key: *target.as_bytes(),
        };

        let mut backoff = config::JOIN_BACKOFF_BASE;
        for attempt in 1..=config::LOOKUP_MAX_ATTEMPTS {
            self.ensure_open()?;
            for addr in self.config.bootstrap.clone() {
                match self.request(addr, req.clone()).await {
                    Ok(DirectoryResponse::Found { addr: route }) => {
                        debug!(target = %target, route = %route, "lookup resolved");
                        return Ok(route);
                    }
                    Ok(DirectoryResponse::NotFound) => {}
                    Ok(_) => return Err(DirectoryError::Protocol),
                    Err(DirectoryError::Closed) => return Err(DirectoryError::Closed),
                    Err(e) => debug!(bootstrap = %addr, error = %e, "lookup contact failed"),
                }
            }
            if attempt < config::LOOKUP_MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config::JOIN_BACKOFF_CAP);
            }
        }

        Err(DirectoryError::PeerUnreachable {
            attempts: config::LOOKUP_MAX_ATTEMPTS,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DirectoryState {
        *self.state.read()
    }

    /// The public key this directory joined under.
    pub fn public_key(&self) -> &WeftPublicKey {
        &self.public_key
    }

    /// Closes the directory. In-flight lookups are cancelled with
    /// [`DirectoryError::Closed`]; later calls fail the same way.
    pub fn close(&self) {
        let mut state = self.state.write();
        if *state == DirectoryState::Closed {
            return;
        }
        *state = DirectoryState::Closed;
        let _ = self.closed_tx.send(true);
        info!(public_key = %self.public_key, "directory closed");
    }

    fn ensure_open(&self) -> Result<(), DirectoryError> {
        if *self.state.read() == DirectoryState::Closed {
            return Err(DirectoryError::Closed);
        }
        Ok(())
    }

    /// One request/response exchange with a registry, bounded by
    /// [`config::DIRECTORY_REQUEST_TIMEOUT`] and cancelled the moment
    /// the directory closes.
    async fn request(
        &self,
        addr: SocketAddr,
        req: DirectoryRequest,
    ) -> Result<DirectoryResponse, DirectoryError> {
        let mut closed = self.closed_rx.clone();

        let exchange = async {
            let io = tokio::time::timeout(
                config::DIRECTORY_REQUEST_TIMEOUT,
                TcpStream::connect(addr),
            )
            .await
            .map_err(|_| {
                FrameError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "directory request timed out",
                ))
            })?
            .map_err(FrameError::Io)?;

            let (mut reader, mut writer) = io.into_split();
            framing::write_frame(&mut writer, &req).await?;
            let resp: Option<DirectoryResponse> = tokio::time::timeout(
                config::DIRECTORY_REQUEST_TIMEOUT,
                framing::read_frame(&mut reader),
            )
            .await
            .map_err(|_| {
                FrameError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "directory response timed out",
                ))
            })??;
            resp.ok_or(DirectoryError::Protocol)
        };

        tokio::select! {
            _ = closed.wait_for(|c| *c) => Err(DirectoryError::Closed),
            res = exchange => res,
        }
    }
}

impl std::fmt::Debug for PeerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerDirectory")
            .field("public_key", &self.public_key)
            .field("state", &self.state())
            .field("bootstrap", &self.config.bootstrap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn local_registry() -> Registry {
        Registry::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind registry")
    }

    #[tokio::test]
    async fn join_announce_lookup_roundtrip() {
        let registry = local_registry().await;
        let config = DirectoryConfig::with_bootstrap(registry.local_addr());

        let server_kp = WeftKeypair::generate();
        let server_dir = PeerDirectory::join(config.clone(), &server_kp).await.unwrap();
        assert_eq!(server_dir.state(), DirectoryState::Ready);
        server_dir.announce(&server_kp.public_key(), 4242).await.unwrap();

        let client_kp = WeftKeypair::generate();
        let client_dir = PeerDirectory::join(config, &client_kp).await.unwrap();
        let route = client_dir.lookup(&server_kp.public_key()).await.unwrap();
        assert_eq!(route.port(), 4242);
        assert_eq!(route.ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn lookup_unknown_key_is_peer_unreachable() {
        let registry = local_registry().await;
        let kp = WeftKeypair::generate();
        let dir = PeerDirectory::join(
            DirectoryConfig::with_bootstrap(registry.local_addr()),
            &kp,
        )
        .await
        .unwrap();

        let stranger = WeftKeypair::generate();
        let err = dir.lookup(&stranger.public_key()).await.unwrap_err();
        assert!(matches!(err, DirectoryError::PeerUnreachable { .. }));
    }

    #[tokio::test]
    async fn reannounce_updates_route() {
        let registry = local_registry().await;
        let kp = WeftKeypair::generate();
        let dir = PeerDirectory::join(
            DirectoryConfig::with_bootstrap(registry.local_addr()),
            &kp,
        )
        .await
        .unwrap();

        dir.announce(&kp.public_key(), 1000).await.unwrap();
        dir.announce(&kp.public_key(), 2000).await.unwrap();

        let route = dir.lookup(&kp.public_key()).await.unwrap();
        assert_eq!(route.port(), 2000);
    }

    #[tokio::test]
    async fn join_without_bootstrap_fails_bounded() {
        // A port nobody is listening on: connection refused, fast.
        let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let kp = WeftKeypair::generate();

        let err = PeerDirectory::join(DirectoryConfig::with_bootstrap(dead), &kp)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::Bootstrap {
                attempts: config::JOIN_MAX_ATTEMPTS
            }
        ));
    }

    #[tokio::test]
    async fn closed_directory_rejects_operations() {
        let registry = local_registry().await;
        let kp = WeftKeypair::generate();
        let dir = PeerDirectory::join(
            DirectoryConfig::with_bootstrap(registry.local_addr()),
            &kp,
        )
        .await
        .unwrap();

        dir.close();
        assert_eq!(dir.state(), DirectoryState::Closed);

        let err = dir.lookup(&kp.public_key()).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Closed));
        let err = dir.announce(&kp.public_key(), 1).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Closed));

        // Idempotent.
        dir.close();
    }

    #[tokio::test]
    async fn close_cancels_in_flight_lookup() {
        let registry = local_registry().await;
        let kp = WeftKeypair::generate();
        let dir = PeerDirectory::join(
            DirectoryConfig::with_bootstrap(registry.local_addr()),
            &kp,
        )
        .await
        .unwrap();

        // An unannounced key keeps the lookup cycling through its retry
        // passes while we pull the rug out.
        let stranger = WeftKeypair::generate().public_key();
        let in_flight = {
            let dir = Arc::clone(&dir);
            tokio::spawn(async move { dir.lookup(&stranger).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        dir.close();

        // The lookup must fail with Closed promptly, not ride out its
        // full retry schedule.
        let err = tokio::time::timeout(std::time::Duration::from_millis(500), in_flight)
            .await
            .expect("lookup outlived close")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Closed));
    }
}
