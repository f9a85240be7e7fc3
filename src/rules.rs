//! Rules engine
//!
//! Turns the anomaly event stream into operator alerts and a per-session
//! risk score. Two execution paths share one engine: the synchronous inline
//! hook invoked from admission, and the asynchronous consumer workers fed by
//! the event stream. The sliding-window member set is keyed by `event_id`,
//! which makes re-evaluation of an already-seen event a no-op on both paths.

pub mod consumer;
pub mod engine;
pub mod risk;
pub mod severity;

pub use consumer::RulesConsumer;
pub use engine::RulesEngine;
pub use severity::EventType;
