//! # Protocol Configuration & Constants
//!
//! Every magic number in WEFT lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! These values define the wire compatibility surface of the substrate.
//! Changing the magic or the frame limits after peers are deployed splits
//! the network, so choose wisely while it's still cheap.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Identity
// ---------------------------------------------------------------------------

/// Protocol magic bytes carried in every connection greeting. Four bytes
/// so peers can reject non-WEFT traffic without parsing further.
pub const PROTOCOL_MAGIC: u32 = 0x57454654; // "WEFT" in ASCII hex.

/// Wire protocol version. Bump on breaking changes to the frame or
/// message layout. Version mismatches are rejected at the greeting.
pub const WIRE_PROTOCOL_VERSION: u16 = 1;

/// The full version string, assembled at compile time so we don't allocate
/// for something this trivial at runtime.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Keypair seeds are exactly this many bytes. A stored seed of any other
/// length means the store is corrupt and boot must fail.
pub const SEED_LENGTH: usize = 32;

/// Ed25519 public keys are 32 bytes. This is the identity peers resolve.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// BLAKE3 digest length used for log frame checksums.
pub const CHECKSUM_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// File name of the append-only log inside a store directory.
pub const LOG_FILE_NAME: &str = "weft.log";

/// Namespace prefix for persisted keypair seeds. The full key for a seed
/// named `dht` is `seed/dht`.
pub const SEED_KEY_PREFIX: &str = "seed/";

/// Upper bound on a single log record (key + value) before serialization.
/// Large enough for any reasonable RPC side effect, small enough that a
/// corrupt length field can't convince us to allocate the moon.
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Maximum size of a single wire frame (directory or RPC). Anything larger
/// is treated as a protocol violation and the connection is dropped.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Directory / Discovery
// ---------------------------------------------------------------------------

/// Default port for a standalone bootstrap registry node.
pub const DEFAULT_BOOTSTRAP_PORT: u16 = 7340;

/// Default port for a node's RPC endpoint.
pub const DEFAULT_RPC_PORT: u16 = 7341;

/// Maximum bootstrap connection attempts before `join` gives up.
pub const JOIN_MAX_ATTEMPTS: u32 = 5;

/// First retry delay after a failed bootstrap contact. Doubles per
/// attempt up to [`JOIN_BACKOFF_CAP`].
pub const JOIN_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Ceiling for the join backoff. Bounded, never indefinite.
pub const JOIN_BACKOFF_CAP: Duration = Duration::from_secs(3);

/// Attempts a lookup makes across the bootstrap set before surfacing
/// `PeerUnreachable`.
pub const LOOKUP_MAX_ATTEMPTS: u32 = 3;

/// Per-attempt network timeout for directory requests.
pub const DIRECTORY_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// RPC
// ---------------------------------------------------------------------------

/// Default deadline for a client call when the caller doesn't pick one.
/// A timeout is an ambiguous outcome — the handler may still commit.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for connection establishment and the Hello exchange.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the per-connection outbound frame queue. Large enough to
/// absorb bursts of concurrent responses without backpressuring dispatch.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
