//! # RPC Wire Types
//!
//! The three frame shapes an RPC connection carries. The server sends
//! exactly one [`Hello`] when a connection opens; after that the client
//! sends [`Request`] frames and the server answers with [`Response`]
//! frames in whatever order handlers complete.

use serde::{Deserialize, Serialize};

use crate::config;

/// Server greeting, first frame on every connection.
///
/// Carries the magic and wire version so incompatible peers fail loudly
/// at connect time, and the server's public key so the client can check
/// it reached the identity it dialed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub magic: u32,
    pub version: u16,
    pub public_key: [u8; 32],
}

impl Hello {
    pub fn for_key(public_key: [u8; 32]) -> Self {
        Self {
            magic: config::PROTOCOL_MAGIC,
            version: config::WIRE_PROTOCOL_VERSION,
            public_key,
        }
    }
}

/// One method invocation. The id is unique per connection and echoes
/// back in the matching [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub payload: Vec<u8>,
}

/// The outcome of one [`Request`], correlated by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub outcome: Result<Vec<u8>, WireFault>,
}

/// A request-scoped fault. Faults travel inside [`Response`] frames —
/// they fail the one request, never the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireFault {
    MethodNotFound { method: String },
    Handler { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_carries_protocol_constants() {
        let hello = Hello::for_key([3u8; 32]);
        assert_eq!(hello.magic, config::PROTOCOL_MAGIC);
        assert_eq!(hello.version, config::WIRE_PROTOCOL_VERSION);
    }

    #[test]
    fn response_outcome_encodes_both_arms() {
        let ok = Response {
            id: 1,
            outcome: Ok(vec![1, 2, 3]),
        };
        let err = Response {
            id: 2,
            outcome: Err(WireFault::MethodNotFound {
                method: "nope".into(),
            }),
        };

        let ok2: Response = bincode::deserialize(&bincode::serialize(&ok).unwrap()).unwrap();
        let err2: Response = bincode::deserialize(&bincode::serialize(&err).unwrap()).unwrap();
        assert!(matches!(ok2.outcome, Ok(ref v) if v == &vec![1, 2, 3]));
        assert!(matches!(
            err2.outcome,
            Err(WireFault::MethodNotFound { ref method }) if method == "nope"
        ));
    }
}
