//! Configuration
//!
//! Runtime parameters come from the command line (with env-var fallbacks)
//! or from a TOML file passed as the first positional argument. Every knob
//! is named and carries a default; nothing probes the environment ad hoc.

pub mod config;
pub mod types;

pub use config::Configuration;
pub use types::{CredentialKeySource, DeploymentProfile};
