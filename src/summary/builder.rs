use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::session::Session;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{Alert, Evidence};

/// Summary returned by the dashboard read endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub tenant_id: String,
    pub exam_schedule_id: String,
    pub user_id: String,
    pub attempt_no: i32,
    pub user_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_risk_score: f64,
    pub trust_score_percent: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<Value>,
    pub alert_counts: Vec<AlertTypeCount>,
    pub evidence: Vec<EvidenceItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTypeCount {
    pub alert_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceItem {
    pub evidence_id: Uuid,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

pub struct SummaryBuilder {
    storage: Arc<dyn Storage>,
}

impl SummaryBuilder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Build the summary for a session, scoped to the caller's tenant.
    /// Returns `None` both for unknown sessions and tenant mismatches, so
    /// foreign tenants cannot probe for existence.
    pub async fn get_summary(
        &self,
        session_id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<SessionSummary>, StorageError> {
        let Some(session) = self.storage.find_session(session_id).await? else {
            return Ok(None);
        };
        if session.identity.tenant_id != tenant_id {
            return Ok(None);
        }

        let mut alerts = self.storage.list_alerts(session_id).await?;
        let evidence = self.storage.list_evidence(session_id).await?;
        self.repair_evidence_links(&mut alerts, &evidence).await;

        Ok(Some(self.assemble(&session, &alerts, &evidence)))
    }

    /// Bind any alert without evidence to the nearest-in-time evidence of
    /// the session (ties go to the earlier item) and persist the repair.
    async fn repair_evidence_links(&self, alerts: &mut [Alert], evidence: &[Evidence]) {
        if evidence.is_empty() {
            return;
        }
        for alert in alerts.iter_mut() {
            if alert.evidence_id.is_some() {
                continue;
            }
            let nearest = evidence.iter().min_by_key(|e| {
                let distance = (e.created_at - alert.created_at).num_milliseconds().abs();
                (distance, e.created_at)
            });
            if let Some(chosen) = nearest {
                match self.storage.update_alert_evidence(alert.id, chosen.id).await {
                    Ok(()) => {
                        info!("alert {} repaired with evidence {}", alert.id, chosen.id);
                        alert.evidence_id = Some(chosen.id);
                    }
                    Err(e) => error!("persisting repaired link on alert {} failed: {}", alert.id, e),
                }
            }
        }
    }

    fn assemble(
        &self,
        session: &Session,
        alerts: &[Alert],
        evidence: &[Evidence],
    ) -> SessionSummary {
        let config = &session.config_snapshot;
        let user_name = ["username", "displayName", "email"]
            .iter()
            .find_map(|key| config.get(*key).and_then(Value::as_str))
            .unwrap_or(&session.identity.user_id)
            .to_string();

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for alert in alerts {
            *counts.entry(alert.alert_type.clone()).or_insert(0) += 1;
        }

        SessionSummary {
            session_id: session.id,
            tenant_id: session.identity.tenant_id.clone(),
            exam_schedule_id: session.identity.exam_schedule_id.clone(),
            user_id: session.identity.user_id.clone(),
            attempt_no: session.identity.attempt_no,
            user_name,
            status: session.status.as_str().to_string(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            current_risk_score: session.current_risk_score,
            trust_score_percent: trust_score(alerts),
            device_info: config.get("deviceInfo").cloned(),
            alert_counts: counts
                .into_iter()
                .map(|(alert_type, count)| AlertTypeCount { alert_type, count })
                .collect(),
            evidence: evidence
                .iter()
                .map(|e| EvidenceItem {
                    evidence_id: e.id,
                    content_type: e.mime_type.clone(),
                    created_at: e.created_at,
                })
                .collect(),
        }
    }
}

/// `round(100 × mean(confidence))` over alerts whose `details.confidence`
/// is numeric; an empty set scores a full 100.
pub fn trust_score(alerts: &[Alert]) -> i32 {
    let confidences: Vec<f64> = alerts
        .iter()
        .filter_map(|a| a.details.get("confidence").and_then(Value::as_f64))
        .collect();
    if confidences.is_empty() {
        return 100;
    }
    let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
    (mean * 100.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::session::SessionIdentity;
    use crate::storage::database_storage::DatabaseStorage;
    use crate::storage::types::{Severity, ThumbnailMeta};
    use serde_json::{json, Map};
    use tempfile::TempDir;

    fn alert_with_confidence(session_id: Uuid, confidence: Option<f64>) -> Alert {
        let mut details = Map::new();
        if let Some(c) = confidence {
            details.insert("confidence".into(), json!(c));
        }
        Alert {
            id: Uuid::new_v4(),
            session_id,
            alert_type: "FACE_MISSING".into(),
            severity: Severity::High,
            created_at: Utc::now(),
            triggering_event_id: None,
            evidence_id: None,
            details,
        }
    }

    #[test]
    fn trust_score_is_mean_confidence() {
        let sid = Uuid::new_v4();
        assert_eq!(trust_score(&[]), 100);

        let alerts = vec![
            alert_with_confidence(sid, Some(0.8)),
            alert_with_confidence(sid, Some(0.6)),
            alert_with_confidence(sid, None), // ignored
        ];
        assert_eq!(trust_score(&alerts), 70);
    }

    #[test]
    fn trust_score_with_no_numeric_confidences_is_full() {
        let sid = Uuid::new_v4();
        assert_eq!(trust_score(&[alert_with_confidence(sid, None)]), 100);
    }

    async fn seeded() -> (TempDir, Arc<DatabaseStorage>, SummaryBuilder, Session) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            DatabaseStorage::new_file(dir.path().join("test.sqlite3"))
                .await
                .unwrap(),
        );
        let mut config = Map::new();
        config.insert("username".into(), json!("ada"));
        config.insert("deviceInfo".into(), json!({"os": "linux"}));
        let session = Session::started(
            SessionIdentity {
                tenant_id: "t1".into(),
                exam_schedule_id: "e1".into(),
                user_id: "u1".into(),
                attempt_no: 1,
            },
            config,
        );
        storage.save_session(&session).await.unwrap();
        let builder = SummaryBuilder::new(storage.clone());
        (dir, storage, builder, session)
    }

    #[tokio::test]
    async fn tenant_mismatch_reads_as_absent() {
        let (_dir, _storage, builder, session) = seeded().await;
        assert!(builder.get_summary(session.id, "t1").await.unwrap().is_some());
        assert!(builder.get_summary(session.id, "t2").await.unwrap().is_none());
        assert!(builder
            .get_summary(Uuid::new_v4(), "t1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn summary_groups_alerts_and_names_the_user() {
        let (_dir, storage, builder, session) = seeded().await;
        for _ in 0..2 {
            storage
                .insert_alert(&alert_with_confidence(session.id, Some(0.5)))
                .await
                .unwrap();
        }
        let summary = builder.get_summary(session.id, "t1").await.unwrap().unwrap();
        assert_eq!(summary.user_name, "ada");
        assert_eq!(summary.trust_score_percent, 50);
        assert_eq!(summary.alert_counts.len(), 1);
        assert_eq!(summary.alert_counts[0].alert_type, "FACE_MISSING");
        assert_eq!(summary.alert_counts[0].count, 2);
        assert_eq!(summary.device_info, Some(json!({"os": "linux"})));
    }

    #[tokio::test]
    async fn first_summary_request_repairs_evidence_links() {
        let (_dir, storage, builder, session) = seeded().await;
        let base = Utc::now();

        // An alert with no link, and two evidence rows around it in time.
        let mut alert = alert_with_confidence(session.id, Some(0.9));
        alert.created_at = base;
        storage.insert_alert(&alert).await.unwrap();

        // attach_evidence needs owning events.
        for (event_id, offset_ms) in [("ev-near", 500), ("ev-far", 5_000)] {
            let event = crate::storage::types::AnomalyEvent {
                event_id: event_id.into(),
                session_id: session.id,
                event_type: "MULTI_PERSON".into(),
                event_time: base,
                severity: Severity::Critical,
                confidence: None,
                details: Map::new(),
                evidence_id: None,
                thumbnail_meta: None,
                created_at: base,
            };
            storage.insert_event(&event).await.unwrap();
            let evidence = Evidence {
                id: Uuid::new_v4(),
                session_id: session.id,
                byte_size: 1,
                sha256: "00".into(),
                mime_type: "image/jpeg".into(),
                locator: format!("{}/thumb-{}.jpg", session.id, event_id),
                created_at: base + chrono::Duration::milliseconds(offset_ms),
            };
            let meta = ThumbnailMeta {
                locator: evidence.locator.clone(),
                size_bytes: 1,
                sha256: "00".into(),
            };
            storage.attach_evidence(event_id, &evidence, &meta).await.unwrap();
        }

        let summary = builder.get_summary(session.id, "t1").await.unwrap().unwrap();
        assert_eq!(summary.evidence.len(), 2);

        // The repair chose the nearest evidence and persisted it.
        let alerts = storage.list_alerts(session.id).await.unwrap();
        let near = storage.list_evidence(session.id).await.unwrap()[0].clone();
        assert_eq!(alerts[0].evidence_id, Some(near.id));
    }
}
