//! Error types
//!
//! Every failure kind the service can surface lives in `types`. The wire
//! names (`duplicate`, `rate_limited`, ...) are stable strings; handlers map
//! them to HTTP statuses in the web layer.

pub mod types;

pub use types::{
    AdmissionError, ConfigError, ControllerError, CredentialError, EphemeralError, RejectReason,
    RulesError, SessionError, StorageError, StreamError, WebError,
};
