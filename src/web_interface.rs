//! Web interface
//!
//! JSON-over-HTTP surface for exam clients and the operator dashboard.
//! Every route runs behind the bearer-credential filter; request-wide
//! failures map to HTTP statuses, per-event failures ride inside the batch
//! response body.

pub mod auth;
pub mod routes;
pub mod types;
pub mod web_server;

pub use web_server::WebServer;
