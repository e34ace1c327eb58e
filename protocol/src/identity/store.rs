//! # IdentityStore — Seed Persistence
//!
//! Resolves or creates the 32-byte seeds that WEFT identities derive
//! from. Seeds live in the [`LogStore`] under `seed/<name>` and are
//! written exactly once per store: first boot generates, every later
//! boot re-reads.
//!
//! The resolve-or-create shape means bootstrap is idempotent — calling
//! it twice returns the same bytes, and a restart with the same storage
//! directory publishes the same public key.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use crate::config;
use crate::identity::WeftKeypair;
use crate::storage::{LogStore, StorageError};

/// Errors that can occur while establishing identity.
///
/// Both variants are fatal at boot: a node that cannot establish its
/// identity must not join the network under a fresh one, or peers
/// holding its old public key would be silently stranded.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// A seed record exists but is not exactly 32 bytes. The store has
    /// been corrupted or written by something that isn't us.
    #[error("stored seed '{name}' is corrupt: expected {expected} bytes, found {found}")]
    SeedCorrupt {
        name: String,
        expected: usize,
        found: usize,
    },

    /// The log rejected the read or the bootstrap append.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Resolves persistent keypair seeds against a [`LogStore`].
///
/// # Single-Writer Assumption
///
/// Exactly one process may own a store directory. Two processes calling
/// [`resolve_or_create_seed`](Self::resolve_or_create_seed) on the same
/// fresh store could race generation; WEFT's deployment model (one node,
/// one store) rules that out, and the log's append-only discipline means
/// the race would at worst leave a superseded seed record behind — but
/// don't do it.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    store: Arc<LogStore>,
}

impl IdentityStore {
    /// Wraps a log store for identity resolution.
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }

    /// Returns the seed stored under `seed/<name>`, generating and
    /// durably appending a fresh one if this is the first boot.
    ///
    /// Never overwrites: an existing seed is returned as-is, whatever
    /// else has happened since it was written.
    pub fn resolve_or_create_seed(&self, name: &str) -> Result<[u8; 32], IdentityError> {
        let key = format!("{}{}", config::SEED_KEY_PREFIX, name);

        if let Some(bytes) = self.store.get(&key) {
            let seed: [u8; 32] =
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| IdentityError::SeedCorrupt {
                        name: name.to_string(),
                        expected: config::SEED_LENGTH,
                        found: bytes.len(),
                    })?;
            debug!(seed = name, "resolved existing seed");
            return Ok(seed);
        }

        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        self.store.append(&key, &seed)?;
        info!(seed = name, "generated and persisted new seed");
        Ok(seed)
    }

    /// Convenience: resolve the seed named `name` and derive its keypair
    /// in one step.
    pub fn resolve_keypair(&self, name: &str) -> Result<WeftKeypair, IdentityError> {
        let seed = self.resolve_or_create_seed(name)?;
        Ok(WeftKeypair::from_seed(&seed))
    }
}
