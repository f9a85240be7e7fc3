//! Process wiring
//!
//! The controller opens every store, builds the pipeline and engine, and
//! owns the background task set: web server, rules consumers, session
//! sweeper, and the ephemeral snapshotter. Shutdown is cooperative over a
//! broadcast channel; the controller drains in-flight work before returning.

pub mod controller_handler;

pub use controller_handler::Controller;
