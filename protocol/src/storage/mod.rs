//! # Storage Module
//!
//! The durable heart of a WEFT node: an append-only log with a
//! materialized key→latest-value view.
//!
//! ## Architecture
//!
//! ```text
//! log.rs — LogStore: checksummed on-disk frames, torn-tail recovery,
//!          the materialized view, and the poison-on-I/O-failure latch
//! ```
//!
//! ## Design Decisions
//!
//! - The log is a single flat file of length-prefixed, BLAKE3-checksummed
//!   frames rather than an embedded KV engine. Crash consistency — a torn
//!   final write must be invisible after reopen — is the contract of this
//!   component, and a byte-level format is the only way to test it at the
//!   byte level.
//! - The view is an in-memory `BTreeMap` rebuilt by replaying the log on
//!   open and maintained incrementally on append. Ordered keys give us
//!   prefix iteration for free.
//! - Appends are linearized by one mutex. That mutex is the single point
//!   of write ordering for the whole node; everything above coordinates
//!   through it.

mod log;

pub use log::{LogRecord, LogStore, StorageError};
