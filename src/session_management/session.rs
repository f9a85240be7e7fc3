use crate::credentials::claims::Claims;
use crate::session_management::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The logical identity a session is keyed by. At most one session row
/// exists per tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub tenant_id: String,
    pub exam_schedule_id: String,
    pub user_id: String,
    pub attempt_no: i32,
}

impl From<&Claims> for SessionIdentity {
    fn from(claims: &Claims) -> Self {
        Self {
            tenant_id: claims.tenant_id.clone(),
            exam_schedule_id: claims.exam_schedule_id.clone(),
            user_id: claims.user_id.clone(),
            attempt_no: claims.attempt_no,
        }
    }
}

/// One proctoring session.
///
/// Status only ever flows ACTIVE -> ENDED; `ended_at` is set exactly when
/// the status becomes ENDED, and `current_risk_score` never drops below
/// zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub identity: SessionIdentity,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub current_risk_score: f64,
    /// Opaque client-provided exam configuration captured at start.
    pub config_snapshot: Map<String, Value>,
}

impl Session {
    /// A fresh ACTIVE session for the given identity.
    pub fn started(identity: SessionIdentity, config_snapshot: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            identity,
            status: SessionStatus::Active,
            created_at: now,
            started_at: now,
            ended_at: None,
            last_heartbeat_at: now,
            current_risk_score: 0.0,
            config_snapshot,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}
