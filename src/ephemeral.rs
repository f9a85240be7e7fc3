//! Ephemeral tracking state
//!
//! The admission pipeline and rules engine coordinate through short-lived
//! keys: replay markers, per-minute rate counters, sliding-window sorted
//! sets, and alert cooldown counters. The contract is a small subset of a
//! Redis-style store: atomic set-if-absent with TTL, atomic increment with
//! TTL, and sorted-set add/prune/count as one atomic step per key.
//!
//! The in-process backend shards keys across mutexes so single-key
//! operations never contend globally, and snapshots itself to disk so
//! markers survive a restart for at least their TTL.

pub mod memory_store;
pub mod store_trait;

pub use memory_store::MemoryEphemeralStore;
pub use store_trait::{EphemeralStore, WindowUpdate};
