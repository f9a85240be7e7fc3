use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::storage::types::{Alert, AnomalyEvent};

/// Error payload carried by every non-2xx JSON response. `error` is the
/// stable failure tag, `message` is for humans.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    #[serde(default)]
    pub exam_config: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub session_id: Uuid,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AlertListResponse {
    pub alerts: Vec<AlertView>,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<EventView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggering_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_id: Option<Uuid>,
    pub details: Map<String, Value>,
}

impl From<Alert> for AlertView {
    fn from(a: Alert) -> Self {
        Self {
            id: a.id,
            session_id: a.session_id,
            alert_type: a.alert_type,
            severity: a.severity.as_str().to_string(),
            created_at: a.created_at,
            triggering_event_id: a.triggering_event_id,
            evidence_id: a.evidence_id,
            details: a.details,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub event_id: String,
    pub session_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_id: Option<Uuid>,
    pub details: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl From<AnomalyEvent> for EventView {
    fn from(e: AnomalyEvent) -> Self {
        Self {
            event_id: e.event_id,
            session_id: e.session_id,
            event_type: e.event_type,
            timestamp: e.event_time,
            severity: e.severity.as_str().to_string(),
            confidence: e.confidence,
            evidence_id: e.evidence_id,
            details: e.details,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevTokenRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub exam_schedule_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub attempt_no: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevTokenResponse {
    pub token: String,
    pub expires_at: String,
}
