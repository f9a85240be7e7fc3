//! Storage Trait
//!
//! Uniform interface over the durable relational backend. Implementors are
//! responsible for transactional writes, unique-constraint enforcement on
//! the session identity tuple and on `event_id`, and indexed scans by
//! `(session_id, created_at)`.

use crate::error_handling::types::StorageError;
use crate::session_management::session::{Session, SessionIdentity};
use crate::storage::types::{Alert, AnomalyEvent, Evidence, RiskScoreSnapshot, ThumbnailMeta};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or update a session row keyed by its id.
    async fn save_session(&self, session: &Session) -> Result<(), StorageError>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, StorageError>;

    async fn find_session_by_identity(
        &self,
        identity: &SessionIdentity,
    ) -> Result<Option<Session>, StorageError>;

    /// Refresh `last_heartbeat_at` on an existing session row.
    async fn update_heartbeat(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Conditionally replace the risk score: succeeds only while the stored
    /// value still equals `expected`. Returns false when a concurrent writer
    /// won; callers retry with a fresh read.
    async fn try_update_risk_score(
        &self,
        session_id: Uuid,
        expected: f64,
        new: f64,
    ) -> Result<bool, StorageError>;

    /// Transition every ACTIVE session whose last heartbeat is older than
    /// `heartbeat_before` to ENDED. Returns how many rows changed.
    async fn end_stale_sessions(
        &self,
        heartbeat_before: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    /// Insert one event in its own transaction.
    ///
    /// Fails with `DuplicateEvent` when the `event_id` is already stored and
    /// with `SessionEnded` when the owning session is no longer ACTIVE.
    async fn insert_event(&self, event: &AnomalyEvent) -> Result<(), StorageError>;

    /// Events of a session in durable insertion order.
    async fn list_events(&self, session_id: Uuid) -> Result<Vec<AnomalyEvent>, StorageError>;

    /// Insert the evidence row and back-link it onto the owning event in a
    /// single transaction.
    async fn attach_evidence(
        &self,
        event_id: &str,
        evidence: &Evidence,
        meta: &ThumbnailMeta,
    ) -> Result<(), StorageError>;

    async fn find_evidence(&self, evidence_id: Uuid) -> Result<Option<Evidence>, StorageError>;

    /// Evidence of a session, oldest first.
    async fn list_evidence(&self, session_id: Uuid) -> Result<Vec<Evidence>, StorageError>;

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StorageError>;

    /// Alerts of a session, newest first.
    async fn list_alerts(&self, session_id: Uuid) -> Result<Vec<Alert>, StorageError>;

    /// Persist a repaired evidence link on an alert.
    async fn update_alert_evidence(
        &self,
        alert_id: Uuid,
        evidence_id: Uuid,
    ) -> Result<(), StorageError>;

    /// Append one risk-score snapshot.
    async fn insert_snapshot(&self, snapshot: &RiskScoreSnapshot) -> Result<(), StorageError>;

    /// Snapshots of a session ordered by creation time.
    async fn list_snapshots(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<RiskScoreSnapshot>, StorageError>;
}
