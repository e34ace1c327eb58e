//! # Key Management
//!
//! Ed25519 keypair derivation and serialization for WEFT identities.
//!
//! Every node carries at least two of these: one keypair for the
//! discovery directory and one for the RPC endpoint. Both are derived
//! from seeds persisted in the log, so they survive restarts.
//!
//! ## Why Ed25519?
//!
//! - Deterministic derivation: a 32-byte seed *is* the secret key, which
//!   makes "same store, same identity" a one-liner instead of a protocol.
//! - 128-bit security in 32+32 bytes. Compact and sufficient.
//! - Constant-time implementations exist and are well-audited.
//!
//! ## Security considerations
//!
//! - We use OS-level RNG (`OsRng`) for fresh key generation.
//! - Key bytes are never logged. If you add logging to this module,
//!   you will be asked to leave.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors that can occur during key operations.
///
/// Intentionally vague about *why* something failed — leaking details
/// about key material through error messages is a classic footgun.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// A WEFT identity keypair wrapping an Ed25519 signing key.
///
/// ## Serialization
///
/// `WeftKeypair` intentionally does NOT implement `Serialize`/
/// `Deserialize`. Persisting a keypair means persisting its seed through
/// [`IdentityStore`](super::IdentityStore) — a deliberate act, not
/// something that happens because a keypair ended up in a struct that
/// got serialized.
pub struct WeftKeypair {
    signing_key: SigningKey,
}

/// The public half of a WEFT identity, safe to share with the world.
///
/// This is what peers resolve through the directory: hand out the hex
/// form out-of-band and anyone on the same bootstrap network can find
/// and call you.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeftPublicKey {
    bytes: [u8; 32],
}

/// An Ed25519 signature over a message. 64 bytes, deterministic for a
/// given (key, message) pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeftSignature {
    bytes: Vec<u8>,
}

impl WeftKeypair {
    /// Generate a fresh keypair from the OS cryptographic RNG.
    ///
    /// For ephemeral identities (tests, one-shot clients). Persistent
    /// identities go through [`IdentityStore`](super::IdentityStore) so
    /// the seed outlives the process.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Constructs a keypair deterministically from a 32-byte seed.
    ///
    /// Pure function: identical seed always yields an identical keypair.
    /// This is the property that keeps a node's published public key
    /// stable across restarts.
    ///
    /// **Warning**: a weak seed yields a weak key. Seeds must come from a
    /// CSPRNG.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Returns the public key associated with this keypair.
    pub fn public_key(&self) -> WeftPublicKey {
        WeftPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Raw public key bytes (32 bytes). Safe to share, log, print.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Hex-encoded public key — the form exported for out-of-band
    /// distribution to clients.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Sign a message. Deterministic — no nonce management, no RNG at
    /// signing time.
    pub fn sign(&self, message: &[u8]) -> WeftSignature {
        let sig = self.signing_key.sign(message);
        WeftSignature {
            bytes: sig.to_bytes().to_vec(),
        }
    }

    /// Verify a signature against this keypair's public key.
    pub fn verify(&self, message: &[u8], signature: &WeftSignature) -> bool {
        self.public_key().verify(message, signature)
    }

    /// Exports the raw 32-byte seed.
    ///
    /// **Handle with extreme care.** This is the only secret standing
    /// between an attacker and full control of the identity.
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Clone for WeftKeypair {
    /// Cloning a keypair is allowed but should make you uncomfortable.
    /// Every copy of a secret is another thing to protect.
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for WeftKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret material in debug output. Not even "partially."
        write!(f, "WeftKeypair(pub={})", self.public_key().to_hex())
    }
}

impl PartialEq for WeftKeypair {
    /// Two keypairs are equal if their public keys match. Comparing
    /// secret material in a non-constant-time way is a bad habit, and
    /// for identity purposes the public key is what matters.
    fn eq(&self, other: &Self) -> bool {
        self.public_key_bytes() == other.public_key_bytes()
    }
}

impl Eq for WeftKeypair {}

// ---------------------------------------------------------------------------
// WeftPublicKey
// ---------------------------------------------------------------------------

impl WeftPublicKey {
    /// Create a `WeftPublicKey` from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Try to create a `WeftPublicKey` from a byte slice, validating the
    /// length and that the bytes are a valid Ed25519 point. Low-order
    /// points and other degenerate encodings are rejected here.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        if slice.len() != 32 {
            return Err(KeyError::InvalidPublicKey);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);

        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;

        Ok(Self { bytes })
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verify a signature against this public key. Boolean because
    /// callers want a yes/no, not a failure taxonomy.
    pub fn verify(&self, message: &[u8], signature: &WeftSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let sig_bytes: [u8; 64] = match signature.bytes.as_slice().try_into() {
            Ok(b) => b,
            Err(_) => return false,
        };
        let dalek_sig = DalekSignature::from_bytes(&sig_bytes);
        verifying_key.verify(message, &dalek_sig).is_ok()
    }

    /// Hex-encoded representation. 64 characters for 32 bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse a hex-encoded public key string.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }
}

impl Hash for WeftPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for WeftPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for WeftPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeftPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// WeftSignature
// ---------------------------------------------------------------------------

impl WeftSignature {
    /// Create a signature from its raw 64-byte representation.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Raw signature bytes (always 64 for a valid Ed25519 signature).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for WeftSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeftSignature({})", hex::encode(&self.bytes))
    }
}
