//! Types shared by the storage backends and the pipeline layers above them.
//!
//! `details` maps are deliberately schema-loose: they are stored as JSON
//! text and re-parsed only where a specific key is read back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

/// Severity attached to events and alerts. Ordering is by escalation, so
/// `max` picks the stronger of a declared and a computed severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(()),
        }
    }
}

/// A stored anomaly event. `event_id` is client-assigned and globally
/// unique; the unique constraint on it is the durable half of replay
/// suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub event_id: String,
    pub session_id: Uuid,
    /// Kept as a string: unknown types are admitted and stored for audit.
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub severity: Severity,
    pub confidence: Option<f64>,
    pub details: Map<String, Value>,
    pub evidence_id: Option<Uuid>,
    pub thumbnail_meta: Option<ThumbnailMeta>,
    pub created_at: DateTime<Utc>,
}

/// Audit record of the thumbnail attached to an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailMeta {
    pub locator: String,
    pub size_bytes: i64,
    pub sha256: String,
}

/// An operator-facing alert derived by the rules engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub session_id: Uuid,
    pub alert_type: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub triggering_event_id: Option<String>,
    pub evidence_id: Option<Uuid>,
    pub details: Map<String, Value>,
}

/// Immutable metadata for one stored thumbnail blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub session_id: Uuid,
    pub byte_size: i64,
    pub sha256: String,
    pub mime_type: String,
    pub locator: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only periodic record of a session's risk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoreSnapshot {
    pub id: Uuid,
    pub session_id: Uuid,
    pub score: f64,
    pub created_at: DateTime<Utc>,
    pub details: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_escalation() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::High.max(Severity::Medium), Severity::High);
    }

    #[test]
    fn severity_round_trips_through_strings() {
        for sev in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            assert_eq!(sev.as_str().parse::<Severity>().unwrap(), sev);
        }
        assert!("SHRUG".parse::<Severity>().is_err());
    }
}
