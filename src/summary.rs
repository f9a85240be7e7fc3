//! Post-session dashboard summary
//!
//! Deterministic read model assembled from the session row, its alerts and
//! its evidence: a derived trust score, alert counts grouped by type, and
//! the chronological evidence list. Requesting a summary also repairs any
//! alert that never got an evidence link.

pub mod builder;

pub use builder::{SessionSummary, SummaryBuilder};
