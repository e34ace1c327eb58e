// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # WEFT — Core Library
//!
//! WEFT is a peer-to-peer request/response substrate: a process keeps a
//! persistent cryptographic identity, discovers remote peers through a
//! distributed directory, and serves named remote procedure calls whose
//! side effects land in an append-only, indexed log.
//!
//! The guiding idea is that the hard parts — stable identity across
//! restarts, discovery without central coordination, crash-consistent
//! storage, and concurrent request isolation — live here, while anything
//! domain-flavored (wallets, payments, intent parsing) is an external
//! collaborator registered through the dispatch interface.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of
//! the substrate:
//!
//! - **storage** — Append-only durable log with a materialized
//!   key→latest-value view. The single point of write ordering.
//! - **identity** — Ed25519 keypairs derived from 32-byte seeds that are
//!   resolved-or-created exactly once per store. Restart, same identity.
//! - **directory** — Bootstrap-based peer discovery: join, announce your
//!   public key, look up someone else's.
//! - **rpc** — Framed-TCP endpoint (server and client roles) plus the
//!   dispatcher that routes method names to handlers and isolates their
//!   failures per call.
//! - **framing** — Length-prefixed frame I/O shared by directory and RPC.
//! - **config** — Protocol constants and tunables.
//!
//! ## Design Philosophy
//!
//! 1. Durability before acknowledgment. A success response means the
//!    append already hit the disk.
//! 2. One handler's failure is that handler's problem. Connections and
//!    concurrent calls survive it.
//! 3. Discovery state is an explicit configuration value, never a
//!    process-wide global — multiple identities per process must work.

pub mod config;
pub mod directory;
pub mod framing;
pub mod identity;
pub mod rpc;
pub mod storage;
