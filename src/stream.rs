//! Event stream
//!
//! Accepted events are published to a partitioned stream keyed by
//! `session_id`, so a rules worker per partition sees every event of a
//! session in order. Small deployments use the in-process implementation;
//! the trait is the seam a broker-backed implementation would fill.

pub mod event_stream;

pub use event_stream::{EventRecord, EventStream, InProcessStream};
