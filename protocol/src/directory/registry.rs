//! # Registry — Bootstrap Node Role
//!
//! The service side of the directory protocol: a route table keyed by
//! public key, served over framed TCP. Any node can run one; a network
//! needs at least one reachable registry for peers to find each other.
//!
//! Announced routes pair the announcer's *observed* IP with the port it
//! claims — a peer can publish which port it listens on, but not which
//! host it is.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::framing::{self, FrameError};

use super::{DirectoryRequest, DirectoryResponse};

/// A running bootstrap registry.
///
/// Binding spawns the accept loop; the listener keeps serving until
/// [`shutdown`](Self::shutdown) or drop. The route table lives for the
/// lifetime of the registry — there is no expiry, matching the
/// private-network deployments WEFT targets where nodes re-announce on
/// every boot anyway.
pub struct Registry {
    local_addr: SocketAddr,
    routes: Arc<DashMap<[u8; 32], SocketAddr>>,
    accept_task: JoinHandle<()>,
}

impl Registry {
    /// Binds a registry on `addr` and starts serving. Bind to port 0 to
    /// let the OS pick (tests do this); [`local_addr`](Self::local_addr)
    /// reports the actual port.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let routes: Arc<DashMap<[u8; 32], SocketAddr>> = Arc::new(DashMap::new());

        let table = Arc::clone(&routes);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let table = Arc::clone(&table);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, peer, table).await {
                                debug!(peer = %peer, error = %e, "registry connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "registry accept failed");
                    }
                }
            }
        });

        info!(addr = %local_addr, "registry listening");
        Ok(Self {
            local_addr,
            routes,
            accept_task,
        })
    }

    /// The address the registry is actually serving on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of announced routes currently held.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Stops accepting connections. Routes are dropped with the registry.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        info!(addr = %self.local_addr, "registry shut down");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("local_addr", &self.local_addr)
            .field("routes", &self.routes.len())
            .finish()
    }
}

/// Serves one peer connection: a loop of request frames, each answered
/// with exactly one response frame. Clean EOF ends the loop.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    routes: Arc<DashMap<[u8; 32], SocketAddr>>,
) -> Result<(), FrameError> {
    let (mut reader, mut writer) = stream.into_split();

    while let Some(req) = framing::read_frame::<_, DirectoryRequest>(&mut reader).await? {
        let resp = match req {
            DirectoryRequest::Announce { public_key, port } => {
                let route = SocketAddr::new(peer.ip(), port);
                routes.insert(public_key, route);
                debug!(
                    public_key = %hex::encode(&public_key[..8]),
                    route = %route,
                    "route announced"
                );
                DirectoryResponse::Announced
            }
            DirectoryRequest::Lookup { public_key } => match routes.get(&public_key) {
                Some(route) => DirectoryResponse::Found { addr: *route },
                None => DirectoryResponse::NotFound,
            },
            DirectoryRequest::Ping => DirectoryResponse::Pong,
        };
        framing::write_frame(&mut writer, &resp).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exchange(addr: SocketAddr, req: DirectoryRequest) -> DirectoryResponse {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        framing::write_frame(&mut writer, &req).await.unwrap();
        framing::read_frame(&mut reader).await.unwrap().expect("response")
    }

    #[tokio::test]
    async fn ping_pong() {
        let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let resp = exchange(registry.local_addr(), DirectoryRequest::Ping).await;
        assert!(matches!(resp, DirectoryResponse::Pong));
    }

    #[tokio::test]
    async fn announce_then_lookup_uses_observed_ip() {
        let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let key = [7u8; 32];

        let resp = exchange(
            registry.local_addr(),
            DirectoryRequest::Announce {
                public_key: key,
                port: 9999,
            },
        )
        .await;
        assert!(matches!(resp, DirectoryResponse::Announced));
        assert_eq!(registry.route_count(), 1);

        let resp = exchange(registry.local_addr(), DirectoryRequest::Lookup { public_key: key }).await;
        match resp {
            DirectoryResponse::Found { addr } => {
                assert_eq!(addr.port(), 9999);
                assert_eq!(addr.ip().to_string(), "127.0.0.1");
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookup_of_unannounced_key_is_not_found() {
        let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let resp = exchange(
            registry.local_addr(),
            DirectoryRequest::Lookup {
                public_key: [0u8; 32],
            },
        )
        .await;
        assert!(matches!(resp, DirectoryResponse::NotFound));
    }

    #[tokio::test]
    async fn several_requests_on_one_connection() {
        let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let stream = TcpStream::connect(registry.local_addr()).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();

        for _ in 0..3 {
            framing::write_frame(&mut writer, &DirectoryRequest::Ping).await.unwrap();
            let resp: DirectoryResponse =
                framing::read_frame(&mut reader).await.unwrap().expect("response");
            assert!(matches!(resp, DirectoryResponse::Pong));
        }
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let registry = Registry::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = registry.local_addr();
        registry.shutdown();
        // Give the abort a beat to land.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Either the connect fails outright or the connection is never
        // served; a ping must not get a pong.
        let attempt = tokio::time::timeout(std::time::Duration::from_millis(300), async {
            let stream = TcpStream::connect(addr).await.ok()?;
            let (mut reader, mut writer) = stream.into_split();
            framing::write_frame(&mut writer, &DirectoryRequest::Ping).await.ok()?;
            framing::read_frame::<_, DirectoryResponse>(&mut reader).await.ok().flatten()
        })
        .await;
        assert!(!matches!(attempt, Ok(Some(DirectoryResponse::Pong))));
    }
}
