//! Batch admission
//!
//! The contention-sensitive front door: every client batch passes the size
//! guard, the identity bind, and the ordered per-event loop (replay, skew,
//! rate limit, durable persist, inline rule hook), then the thumbnail loop.
//! Everything here leans on single-key atomic operations in the ephemeral
//! store; there is no batch-wide lock.

pub mod pipeline;
pub mod types;

pub use pipeline::AdmissionPipeline;
pub use types::{BatchRequest, BatchResult, EventPayload, ThumbnailPayload};
