use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ephemeral::store_trait::EphemeralStore;
use crate::error_handling::types::{RulesError, StorageError};
use crate::rules::severity::{self, EventType};
use crate::rules::risk;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{Alert, RiskScoreSnapshot, Severity};
use crate::stream::event_stream::EventRecord;

/// Hard cap on sliding-window retention.
const WINDOW_HARD_CAP_MS: i64 = 10 * 60 * 1000;
/// Evaluation window for the threshold rules.
const EVAL_WINDOW_MS: i64 = 5 * 60 * 1000;
/// TTL of the per-(session, type) sorted sets.
const WINDOW_TTL: Duration = Duration::from_secs(4 * 3600);

const RISK_UPDATE_ATTEMPTS: usize = 3;

#[derive(Default)]
struct SnapshotState {
    last_written: Option<DateTime<Utc>>,
    pending_score: Option<f64>,
}

/// Shared evaluation logic behind both execution paths.
///
/// Idempotence rests on the sliding window: the member set is keyed by
/// `event_id`, so an event that was already evaluated (on either path) is
/// detected on insert and skipped entirely: no double window count, no
/// second risk-score application, no repeat alert.
pub struct RulesEngine {
    storage: Arc<dyn Storage>,
    ephemeral: Arc<dyn EphemeralStore>,
    score_decay: f64,
    alert_cooldown: Duration,
    snapshot_interval: chrono::Duration,
    snapshot_state: Mutex<HashMap<Uuid, SnapshotState>>,
}

impl RulesEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        ephemeral: Arc<dyn EphemeralStore>,
        score_decay: f64,
        alert_cooldown: Duration,
        snapshot_interval: Duration,
    ) -> Self {
        Self {
            storage,
            ephemeral,
            score_decay,
            alert_cooldown,
            snapshot_interval: chrono::Duration::from_std(snapshot_interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            snapshot_state: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate one event. Returns the alert that was emitted, if any.
    pub async fn evaluate(&self, record: &EventRecord) -> Result<Option<Alert>, RulesError> {
        let ts_ms = record.event_time.timestamp_millis();
        let window_key = format!("sw:{}:{}", record.session_id, record.event_type);

        let update = self
            .ephemeral
            .window_add_and_count(
                &window_key,
                &record.event_id,
                ts_ms,
                ts_ms - WINDOW_HARD_CAP_MS,
                ts_ms - EVAL_WINDOW_MS,
                ts_ms,
                WINDOW_TTL,
            )
            .await?;
        if !update.newly_added {
            debug!("event {} already evaluated, skipping", record.event_id);
            return Ok(None);
        }

        let event_type = EventType::parse(&record.event_type);
        let new_score = self
            .apply_risk_delta(record.session_id, event_type, record.confidence)
            .await?;

        let decision = severity::evaluate(event_type, update.count);
        let declared = record
            .declared_severity
            .as_deref()
            .and_then(|s| s.parse::<Severity>().ok());
        let inherently_alerting = declared >= Some(Severity::High);

        let mut emitted = None;
        if decision.fired || inherently_alerting {
            let severity = [declared, decision.computed]
                .into_iter()
                .flatten()
                .max()
                .unwrap_or(Severity::Medium);
            if self.cooldown_open(record).await? {
                let alert = self.build_alert(record, severity);
                self.storage.insert_alert(&alert).await?;
                debug!(
                    "alert {} emitted for session {} type {} severity {}",
                    alert.id,
                    record.session_id,
                    record.event_type,
                    severity.as_str()
                );
                emitted = Some(alert);
            }
        }

        self.maybe_snapshot(record.session_id, new_score).await;
        Ok(emitted)
    }

    /// One alert per cooldown epoch per (session, type): the first increment
    /// of the epoch wins, everyone else is suppressed until the TTL lapses.
    async fn cooldown_open(&self, record: &EventRecord) -> Result<bool, RulesError> {
        let key = format!("alert-count:{}:{}", record.session_id, record.event_type);
        let count = self.ephemeral.increment(&key, self.alert_cooldown).await?;
        Ok(count == 1)
    }

    fn build_alert(&self, record: &EventRecord, severity: Severity) -> Alert {
        let mut details = Map::new();
        details.insert("eventId".into(), Value::String(record.event_id.clone()));
        details.insert(
            "confidence".into(),
            record
                .confidence
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        details.insert("details".into(), Value::Object(record.details.clone()));
        Alert {
            id: Uuid::new_v4(),
            session_id: record.session_id,
            alert_type: record.event_type.clone(),
            severity,
            created_at: Utc::now(),
            triggering_event_id: Some(record.event_id.clone()),
            evidence_id: None,
            details,
        }
    }

    /// Optimistic-concurrency score update, bounded retries.
    async fn apply_risk_delta(
        &self,
        session_id: Uuid,
        event_type: EventType,
        confidence: Option<f64>,
    ) -> Result<f64, RulesError> {
        for _ in 0..RISK_UPDATE_ATTEMPTS {
            let session = self
                .storage
                .find_session(session_id)
                .await?
                .ok_or(RulesError::SessionGone)?;
            let new_score = risk::next_score(
                session.current_risk_score,
                self.score_decay,
                event_type,
                confidence,
            );
            if self
                .storage
                .try_update_risk_score(session_id, session.current_risk_score, new_score)
                .await?
            {
                return Ok(new_score);
            }
        }
        warn!(
            "risk score update for session {} lost {} races, giving up",
            session_id, RISK_UPDATE_ATTEMPTS
        );
        Err(RulesError::Storage(StorageError::WriteFailed))
    }

    /// Append a snapshot when the per-session interval has elapsed;
    /// otherwise remember the score so a shutdown flush can persist it.
    async fn maybe_snapshot(&self, session_id: Uuid, score: f64) {
        let now = Utc::now();
        let due = {
            let mut states = match self.snapshot_state.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let state = states.entry(session_id).or_default();
            let due = match state.last_written {
                None => true,
                Some(last) => now - last >= self.snapshot_interval,
            };
            if due {
                state.last_written = Some(now);
                state.pending_score = None;
            } else {
                state.pending_score = Some(score);
            }
            due
        };
        if due {
            if let Err(e) = self
                .storage
                .insert_snapshot(&RiskScoreSnapshot {
                    id: Uuid::new_v4(),
                    session_id,
                    score,
                    created_at: now,
                    details: Map::new(),
                })
                .await
            {
                error!("snapshot write failed for session {}: {}", session_id, e);
            }
        }
    }

    /// Persist every pending score as a final snapshot. Called on shutdown
    /// so in-flight state is not lost.
    pub async fn flush_pending_snapshots(&self) {
        let pending: Vec<(Uuid, f64)> = {
            let mut states = match self.snapshot_state.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            states
                .iter_mut()
                .filter_map(|(id, state)| state.pending_score.take().map(|score| (*id, score)))
                .collect()
        };
        for (session_id, score) in pending {
            if let Err(e) = self
                .storage
                .insert_snapshot(&RiskScoreSnapshot {
                    id: Uuid::new_v4(),
                    session_id,
                    score,
                    created_at: Utc::now(),
                    details: Map::new(),
                })
                .await
            {
                error!("final snapshot write failed for session {}: {}", session_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeral::memory_store::MemoryEphemeralStore;
    use crate::session_management::session::{Session, SessionIdentity};
    use crate::storage::database_storage::DatabaseStorage;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<DatabaseStorage>, Arc<RulesEngine>, Uuid) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            DatabaseStorage::new_file(dir.path().join("test.sqlite3"))
                .await
                .unwrap(),
        );
        let session = Session::started(
            SessionIdentity {
                tenant_id: "t1".into(),
                exam_schedule_id: "e1".into(),
                user_id: "u1".into(),
                attempt_no: 1,
            },
            Map::new(),
        );
        storage.save_session(&session).await.unwrap();
        let engine = Arc::new(RulesEngine::new(
            storage.clone(),
            Arc::new(MemoryEphemeralStore::new()),
            0.98,
            Duration::from_secs(300),
            Duration::from_secs(60),
        ));
        (dir, storage, engine, session.id)
    }

    fn record(
        session_id: Uuid,
        event_id: &str,
        event_type: &str,
        confidence: Option<f64>,
        declared: Option<&str>,
    ) -> EventRecord {
        EventRecord {
            event_id: event_id.into(),
            session_id,
            event_type: event_type.into(),
            event_time: Utc::now(),
            confidence,
            declared_severity: declared.map(String::from),
            details: Map::new(),
        }
    }

    #[tokio::test]
    async fn single_look_away_scores_without_alerting() {
        let (_dir, storage, engine, session_id) = setup().await;
        let alert = engine
            .evaluate(&record(session_id, "e1", "LOOK_AWAY", Some(0.8), Some("MEDIUM")))
            .await
            .unwrap();
        assert!(alert.is_none());

        let session = storage.find_session(session_id).await.unwrap().unwrap();
        assert!((session.current_risk_score - 4.0).abs() < 1e-9);
        assert!(storage.list_alerts(session_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn multi_person_alerts_critical_immediately() {
        let (_dir, storage, engine, session_id) = setup().await;
        let alert = engine
            .evaluate(&record(session_id, "e2", "MULTI_PERSON", Some(0.95), None))
            .await
            .unwrap()
            .expect("alert should be emitted");
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.alert_type, "MULTI_PERSON");
        assert_eq!(alert.triggering_event_id.as_deref(), Some("e2"));

        let stored = storage.list_alerts(session_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0].details.get("eventId"),
            Some(&Value::String("e2".into()))
        );
    }

    #[tokio::test]
    async fn face_missing_escalates_on_third_and_respects_cooldown() {
        let (_dir, storage, engine, session_id) = setup().await;
        for i in 0..2 {
            let alert = engine
                .evaluate(&record(session_id, &format!("f{}", i), "FACE_MISSING", None, None))
                .await
                .unwrap();
            assert!(alert.is_none(), "event {} should not alert", i);
        }
        let third = engine
            .evaluate(&record(session_id, "f2", "FACE_MISSING", None, None))
            .await
            .unwrap()
            .expect("third FACE_MISSING should alert");
        assert_eq!(third.severity, Severity::High);

        // A fourth within the cooldown window stays quiet.
        let fourth = engine
            .evaluate(&record(session_id, "f3", "FACE_MISSING", None, None))
            .await
            .unwrap();
        assert!(fourth.is_none());
        assert_eq!(storage.list_alerts(session_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn re_evaluation_is_idempotent() {
        let (_dir, storage, engine, session_id) = setup().await;
        let rec = record(session_id, "dup", "LOOK_AWAY", Some(0.5), None);
        engine.evaluate(&rec).await.unwrap();
        let score_after_first = storage
            .find_session(session_id)
            .await
            .unwrap()
            .unwrap()
            .current_risk_score;

        // Same event arriving over the async path a second time.
        let replay = engine.evaluate(&rec).await.unwrap();
        assert!(replay.is_none());
        let score_after_replay = storage
            .find_session(session_id)
            .await
            .unwrap()
            .unwrap()
            .current_risk_score;
        assert_eq!(score_after_first, score_after_replay);
    }

    #[tokio::test]
    async fn declared_high_severity_forces_an_alert() {
        let (_dir, storage, engine, session_id) = setup().await;
        let alert = engine
            .evaluate(&record(session_id, "h1", "LOOK_AWAY", Some(0.9), Some("HIGH")))
            .await
            .unwrap()
            .expect("declared HIGH should alert");
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(storage.list_alerts(session_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshots_are_written_and_flushed_in_order() {
        let (_dir, storage, engine, session_id) = setup().await;
        // First event snapshots immediately; the second lands inside the
        // interval and stays pending until flushed.
        engine
            .evaluate(&record(session_id, "s1", "LOW_LIGHT", None, None))
            .await
            .unwrap();
        engine
            .evaluate(&record(session_id, "s2", "LOW_LIGHT", None, None))
            .await
            .unwrap();
        assert_eq!(storage.list_snapshots(session_id).await.unwrap().len(), 1);

        engine.flush_pending_snapshots().await;
        let snapshots = storage.list_snapshots(session_id).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].created_at < snapshots[1].created_at);
        assert!(snapshots[1].score > snapshots[0].score);
    }

    #[tokio::test]
    async fn unknown_types_score_but_never_alert() {
        let (_dir, storage, engine, session_id) = setup().await;
        let alert = engine
            .evaluate(&record(session_id, "u1", "GAZE_DRIFT", Some(1.0), None))
            .await
            .unwrap();
        assert!(alert.is_none());
        let session = storage.find_session(session_id).await.unwrap().unwrap();
        assert!((session.current_risk_score - 1.0).abs() < 1e-9);
    }
}
