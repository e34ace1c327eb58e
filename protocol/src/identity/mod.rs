//! # Identity Module
//!
//! Persistent cryptographic identity for WEFT nodes.
//!
//! A node's identity is an Ed25519 keypair derived deterministically from
//! a 32-byte seed. The seed is the durable artifact: it is generated once
//! per store (first boot), appended to the [`LogStore`](crate::storage),
//! and re-read on every later boot. Same seed, same keypair, same public
//! key — which is exactly what makes a node resolvable by peers across
//! restarts.
//!
//! ```text
//! keys.rs  — WeftKeypair / WeftPublicKey: derivation, hex, sign/verify
//! store.rs — IdentityStore: resolve-or-create seeds over the log
//! ```

mod keys;
mod store;

pub use keys::{KeyError, WeftKeypair, WeftPublicKey, WeftSignature};
pub use store::{IdentityError, IdentityStore};
