//! Session identity and lifecycle
//!
//! A session is the one active proctoring context for a
//! `(tenant, exam schedule, user, attempt)` identity tuple. `start` is
//! idempotent on the tuple, `end` is monotone, and a background sweeper
//! ends sessions whose heartbeats have gone stale.

pub mod session;
pub mod session_store;
pub mod sweeper;

use serde::{Deserialize, Serialize};

pub use session::{Session, SessionIdentity};
pub use session_store::SessionStore;
pub use sweeper::SessionSweeper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Ended => "ENDED",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "ENDED" => Ok(SessionStatus::Ended),
            _ => Err(()),
        }
    }
}
