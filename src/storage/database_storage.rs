use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::error;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbBackend,
    DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::session::{Session, SessionIdentity};
use crate::session_management::SessionStatus;
use crate::storage::db_entities as sessions;
use crate::storage::db_entities::{alerts, events, evidence as evidence_entity, snapshots};
use crate::storage::storage_trait::Storage;
use crate::storage::types::{Alert, AnomalyEvent, Evidence, RiskScoreSnapshot, Severity, ThumbnailMeta};

pub struct DatabaseStorage {
    conn: DatabaseConnection,
}

/// Timestamps are stored as fixed-width RFC 3339 text (microseconds, UTC),
/// which keeps lexicographic comparison equivalent to chronological order.
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            error!("invalid stored timestamp {:?}: {}", s, e);
            StorageError::ReadFailed
        })
}

fn parse_uuid(s: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(s).map_err(|e| {
        error!("invalid stored uuid {:?}: {}", s, e);
        StorageError::ReadFailed
    })
}

fn parse_map(s: &str) -> Result<Map<String, Value>, StorageError> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Ok(map),
        _ => {
            error!("invalid stored JSON object: {:?}", s);
            Err(StorageError::ReadFailed)
        }
    }
}

fn is_unique_violation(e: &DbErr) -> bool {
    // SQLite surfaces these as "UNIQUE constraint failed: <table>.<column>".
    e.to_string().contains("UNIQUE constraint failed")
}

impl DatabaseStorage {
    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
        }
        // DSN understood by the sea-orm/sqlx driver; creates the file if needed
        let dsn = format!("sqlite://{}?mode=rwc", path_ref.to_string_lossy());
        let conn = Database::connect(dsn).await.map_err(|e| {
            error!("DB connect failed: {e}");
            StorageError::ConnectionFailed
        })?;
        Self::bootstrap(&conn).await?;
        Ok(Self { conn })
    }

    async fn bootstrap(conn: &DatabaseConnection) -> Result<(), StorageError> {
        let statements = [
            "PRAGMA foreign_keys = ON",
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                exam_schedule_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                attempt_no INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                last_heartbeat_at TEXT NOT NULL,
                current_risk_score REAL NOT NULL,
                config_snapshot_json TEXT NOT NULL
            );
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_session_identity
             ON sessions (tenant_id, exam_schedule_id, user_id, attempt_no);",
            "CREATE INDEX IF NOT EXISTS idx_session_status ON sessions (tenant_id, status);",
            r#"
            CREATE TABLE IF NOT EXISTS anomaly_events (
                event_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_time TEXT NOT NULL,
                severity TEXT NOT NULL,
                confidence REAL,
                details_json TEXT NOT NULL,
                evidence_id TEXT,
                thumbnail_meta_json TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_events_session_time
             ON anomaly_events (session_id, created_at);",
            "CREATE INDEX IF NOT EXISTS idx_events_type ON anomaly_events (event_type);",
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                created_at TEXT NOT NULL,
                triggering_event_id TEXT,
                evidence_id TEXT,
                details_json TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_alerts_session ON alerts (session_id, created_at);",
            r#"
            CREATE TABLE IF NOT EXISTS evidence (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                sha256 TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                locator TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_evidence_session ON evidence (session_id, created_at);",
            r#"
            CREATE TABLE IF NOT EXISTS risk_snapshots (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                score REAL NOT NULL,
                created_at TEXT NOT NULL,
                details_json TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_snapshots_session
             ON risk_snapshots (session_id, created_at);",
        ];
        for sql in statements {
            conn.execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
                .await
                .map_err(|e| {
                    error!("DB bootstrap failed: {e}");
                    StorageError::WriteFailed
                })?;
        }
        Ok(())
    }

    fn to_session_model(s: &Session) -> sessions::ActiveModel {
        sessions::ActiveModel {
            id: Set(s.id.to_string()),
            tenant_id: Set(s.identity.tenant_id.clone()),
            exam_schedule_id: Set(s.identity.exam_schedule_id.clone()),
            user_id: Set(s.identity.user_id.clone()),
            attempt_no: Set(s.identity.attempt_no),
            status: Set(s.status.as_str().to_string()),
            created_at: Set(fmt_ts(&s.created_at)),
            started_at: Set(fmt_ts(&s.started_at)),
            ended_at: Set(s.ended_at.as_ref().map(fmt_ts)),
            last_heartbeat_at: Set(fmt_ts(&s.last_heartbeat_at)),
            current_risk_score: Set(s.current_risk_score),
            config_snapshot_json: Set(Value::Object(s.config_snapshot.clone()).to_string()),
        }
    }

    fn from_session_model(m: sessions::Model) -> Result<Session, StorageError> {
        Ok(Session {
            id: parse_uuid(&m.id)?,
            identity: SessionIdentity {
                tenant_id: m.tenant_id,
                exam_schedule_id: m.exam_schedule_id,
                user_id: m.user_id,
                attempt_no: m.attempt_no,
            },
            status: m.status.parse::<SessionStatus>().map_err(|_| {
                error!("invalid stored session status {:?}", m.status);
                StorageError::ReadFailed
            })?,
            created_at: parse_ts(&m.created_at)?,
            started_at: parse_ts(&m.started_at)?,
            ended_at: m.ended_at.as_deref().map(parse_ts).transpose()?,
            last_heartbeat_at: parse_ts(&m.last_heartbeat_at)?,
            current_risk_score: m.current_risk_score,
            config_snapshot: parse_map(&m.config_snapshot_json)?,
        })
    }

    fn to_event_model(e: &AnomalyEvent) -> Result<events::ActiveModel, StorageError> {
        let thumbnail_meta_json = match e.thumbnail_meta {
            Some(ref meta) => {
                Some(serde_json::to_string(meta).map_err(|_| StorageError::WriteFailed)?)
            }
            None => None,
        };
        Ok(events::ActiveModel {
            event_id: Set(e.event_id.clone()),
            session_id: Set(e.session_id.to_string()),
            event_type: Set(e.event_type.clone()),
            event_time: Set(fmt_ts(&e.event_time)),
            severity: Set(e.severity.as_str().to_string()),
            confidence: Set(e.confidence),
            details_json: Set(Value::Object(e.details.clone()).to_string()),
            evidence_id: Set(e.evidence_id.map(|id| id.to_string())),
            thumbnail_meta_json: Set(thumbnail_meta_json),
            created_at: Set(fmt_ts(&e.created_at)),
        })
    }

    fn from_event_model(m: events::Model) -> Result<AnomalyEvent, StorageError> {
        let thumbnail_meta = match m.thumbnail_meta_json {
            Some(ref raw) => Some(serde_json::from_str::<ThumbnailMeta>(raw).map_err(|e| {
                error!("invalid stored thumbnail meta: {e}");
                StorageError::ReadFailed
            })?),
            None => None,
        };
        Ok(AnomalyEvent {
            event_id: m.event_id,
            session_id: parse_uuid(&m.session_id)?,
            event_type: m.event_type,
            event_time: parse_ts(&m.event_time)?,
            severity: m.severity.parse::<Severity>().map_err(|_| {
                error!("invalid stored severity {:?}", m.severity);
                StorageError::ReadFailed
            })?,
            confidence: m.confidence,
            details: parse_map(&m.details_json)?,
            evidence_id: m.evidence_id.as_deref().map(parse_uuid).transpose()?,
            thumbnail_meta,
            created_at: parse_ts(&m.created_at)?,
        })
    }

    fn from_alert_model(m: alerts::Model) -> Result<Alert, StorageError> {
        Ok(Alert {
            id: parse_uuid(&m.id)?,
            session_id: parse_uuid(&m.session_id)?,
            alert_type: m.alert_type,
            severity: m.severity.parse::<Severity>().map_err(|_| {
                error!("invalid stored severity {:?}", m.severity);
                StorageError::ReadFailed
            })?,
            created_at: parse_ts(&m.created_at)?,
            triggering_event_id: m.triggering_event_id,
            evidence_id: m.evidence_id.as_deref().map(parse_uuid).transpose()?,
            details: parse_map(&m.details_json)?,
        })
    }

    fn from_evidence_model(m: evidence_entity::Model) -> Result<Evidence, StorageError> {
        Ok(Evidence {
            id: parse_uuid(&m.id)?,
            session_id: parse_uuid(&m.session_id)?,
            byte_size: m.byte_size,
            sha256: m.sha256,
            mime_type: m.mime_type,
            locator: m.locator,
            created_at: parse_ts(&m.created_at)?,
        })
    }

    fn from_snapshot_model(m: snapshots::Model) -> Result<RiskScoreSnapshot, StorageError> {
        Ok(RiskScoreSnapshot {
            id: parse_uuid(&m.id)?,
            session_id: parse_uuid(&m.session_id)?,
            score: m.score,
            created_at: parse_ts(&m.created_at)?,
            details: parse_map(&m.details_json)?,
        })
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let am = Self::to_session_model(session);
        match sessions::Entity::find_by_id(session.id.to_string())
            .one(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in save_session: {e}");
                StorageError::ReadFailed
            })? {
            Some(_) => {
                am.update(&self.conn).await.map_err(|e| {
                    error!("DB write error in save_session update: {e}");
                    StorageError::WriteFailed
                })?;
            }
            None => {
                // exec avoids fetching the inserted row back
                sessions::Entity::insert(am)
                    .exec(&self.conn)
                    .await
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            StorageError::DuplicateEvent
                        } else {
                            error!("DB write error in save_session insert: {e}");
                            StorageError::WriteFailed
                        }
                    })?;
            }
        }
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, StorageError> {
        sessions::Entity::find_by_id(session_id.to_string())
            .one(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in find_session: {e}");
                StorageError::ReadFailed
            })?
            .map(Self::from_session_model)
            .transpose()
    }

    async fn find_session_by_identity(
        &self,
        identity: &SessionIdentity,
    ) -> Result<Option<Session>, StorageError> {
        sessions::Entity::find()
            .filter(sessions::Column::TenantId.eq(identity.tenant_id.clone()))
            .filter(sessions::Column::ExamScheduleId.eq(identity.exam_schedule_id.clone()))
            .filter(sessions::Column::UserId.eq(identity.user_id.clone()))
            .filter(sessions::Column::AttemptNo.eq(identity.attempt_no))
            .one(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in find_session_by_identity: {e}");
                StorageError::ReadFailed
            })?
            .map(Self::from_session_model)
            .transpose()
    }

    async fn update_heartbeat(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sessions::Entity::update_many()
            .col_expr(sessions::Column::LastHeartbeatAt, Expr::value(fmt_ts(&at)))
            .filter(sessions::Column::Id.eq(session_id.to_string()))
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error in update_heartbeat: {e}");
                StorageError::WriteFailed
            })?;
        Ok(())
    }

    async fn try_update_risk_score(
        &self,
        session_id: Uuid,
        expected: f64,
        new: f64,
    ) -> Result<bool, StorageError> {
        let result = sessions::Entity::update_many()
            .col_expr(sessions::Column::CurrentRiskScore, Expr::value(new))
            .filter(sessions::Column::Id.eq(session_id.to_string()))
            .filter(sessions::Column::CurrentRiskScore.eq(expected))
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error in try_update_risk_score: {e}");
                StorageError::WriteFailed
            })?;
        Ok(result.rows_affected == 1)
    }

    async fn end_stale_sessions(
        &self,
        heartbeat_before: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let result = sessions::Entity::update_many()
            .col_expr(
                sessions::Column::Status,
                Expr::value(SessionStatus::Ended.as_str()),
            )
            .col_expr(sessions::Column::EndedAt, Expr::value(fmt_ts(&ended_at)))
            .filter(sessions::Column::Status.eq(SessionStatus::Active.as_str()))
            .filter(sessions::Column::LastHeartbeatAt.lt(fmt_ts(&heartbeat_before)))
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error in end_stale_sessions: {e}");
                StorageError::WriteFailed
            })?;
        Ok(result.rows_affected)
    }

    async fn insert_event(&self, event: &AnomalyEvent) -> Result<(), StorageError> {
        let am = Self::to_event_model(event)?;
        let txn = self.conn.begin().await.map_err(|e| {
            error!("DB txn begin failed in insert_event: {e}");
            StorageError::WriteFailed
        })?;

        let session = sessions::Entity::find_by_id(event.session_id.to_string())
            .one(&txn)
            .await
            .map_err(|e| {
                error!("DB read error in insert_event session check: {e}");
                StorageError::ReadFailed
            })?
            .ok_or(StorageError::WriteFailed)?;
        if session.status != SessionStatus::Active.as_str() {
            return Err(StorageError::SessionEnded);
        }

        events::Entity::insert(am).exec(&txn).await.map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::DuplicateEvent
            } else {
                error!("DB write error in insert_event: {e}");
                StorageError::WriteFailed
            }
        })?;

        txn.commit().await.map_err(|e| {
            error!("DB txn commit failed in insert_event: {e}");
            StorageError::WriteFailed
        })
    }

    async fn list_events(&self, session_id: Uuid) -> Result<Vec<AnomalyEvent>, StorageError> {
        let rows = events::Entity::find()
            .filter(events::Column::SessionId.eq(session_id.to_string()))
            .order_by_asc(events::Column::CreatedAt)
            .all(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in list_events: {e}");
                StorageError::ReadFailed
            })?;
        rows.into_iter().map(Self::from_event_model).collect()
    }

    async fn attach_evidence(
        &self,
        event_id: &str,
        evidence: &Evidence,
        meta: &ThumbnailMeta,
    ) -> Result<(), StorageError> {
        let txn = self.conn.begin().await.map_err(|e| {
            error!("DB txn begin failed in attach_evidence: {e}");
            StorageError::WriteFailed
        })?;

        let event = events::Entity::find_by_id(event_id.to_string())
            .one(&txn)
            .await
            .map_err(|e| {
                error!("DB read error in attach_evidence: {e}");
                StorageError::ReadFailed
            })?
            .ok_or(StorageError::WriteFailed)?;

        let am = evidence_entity::ActiveModel {
            id: Set(evidence.id.to_string()),
            session_id: Set(evidence.session_id.to_string()),
            byte_size: Set(evidence.byte_size),
            sha256: Set(evidence.sha256.clone()),
            mime_type: Set(evidence.mime_type.clone()),
            locator: Set(evidence.locator.clone()),
            created_at: Set(fmt_ts(&evidence.created_at)),
        };
        evidence_entity::Entity::insert(am)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!("DB write error in attach_evidence insert: {e}");
                StorageError::WriteFailed
            })?;

        let mut event_am = event.into_active_model();
        event_am.evidence_id = Set(Some(evidence.id.to_string()));
        event_am.thumbnail_meta_json = Set(Some(
            serde_json::to_string(meta).map_err(|_| StorageError::WriteFailed)?,
        ));
        event_am.update(&txn).await.map_err(|e| {
            error!("DB write error in attach_evidence link: {e}");
            StorageError::WriteFailed
        })?;

        txn.commit().await.map_err(|e| {
            error!("DB txn commit failed in attach_evidence: {e}");
            StorageError::WriteFailed
        })
    }

    async fn find_evidence(&self, evidence_id: Uuid) -> Result<Option<Evidence>, StorageError> {
        evidence_entity::Entity::find_by_id(evidence_id.to_string())
            .one(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in find_evidence: {e}");
                StorageError::ReadFailed
            })?
            .map(Self::from_evidence_model)
            .transpose()
    }

    async fn list_evidence(&self, session_id: Uuid) -> Result<Vec<Evidence>, StorageError> {
        let rows = evidence_entity::Entity::find()
            .filter(evidence_entity::Column::SessionId.eq(session_id.to_string()))
            .order_by_asc(evidence_entity::Column::CreatedAt)
            .all(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in list_evidence: {e}");
                StorageError::ReadFailed
            })?;
        rows.into_iter().map(Self::from_evidence_model).collect()
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        let am = alerts::ActiveModel {
            id: Set(alert.id.to_string()),
            session_id: Set(alert.session_id.to_string()),
            alert_type: Set(alert.alert_type.clone()),
            severity: Set(alert.severity.as_str().to_string()),
            created_at: Set(fmt_ts(&alert.created_at)),
            triggering_event_id: Set(alert.triggering_event_id.clone()),
            evidence_id: Set(alert.evidence_id.map(|id| id.to_string())),
            details_json: Set(Value::Object(alert.details.clone()).to_string()),
        };
        alerts::Entity::insert(am)
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error in insert_alert: {e}");
                StorageError::WriteFailed
            })?;
        Ok(())
    }

    async fn list_alerts(&self, session_id: Uuid) -> Result<Vec<Alert>, StorageError> {
        let rows = alerts::Entity::find()
            .filter(alerts::Column::SessionId.eq(session_id.to_string()))
            .order_by_desc(alerts::Column::CreatedAt)
            .all(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in list_alerts: {e}");
                StorageError::ReadFailed
            })?;
        rows.into_iter().map(Self::from_alert_model).collect()
    }

    async fn update_alert_evidence(
        &self,
        alert_id: Uuid,
        evidence_id: Uuid,
    ) -> Result<(), StorageError> {
        alerts::Entity::update_many()
            .col_expr(
                alerts::Column::EvidenceId,
                Expr::value(evidence_id.to_string()),
            )
            .filter(alerts::Column::Id.eq(alert_id.to_string()))
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error in update_alert_evidence: {e}");
                StorageError::WriteFailed
            })?;
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &RiskScoreSnapshot) -> Result<(), StorageError> {
        let am = snapshots::ActiveModel {
            id: Set(snapshot.id.to_string()),
            session_id: Set(snapshot.session_id.to_string()),
            score: Set(snapshot.score),
            created_at: Set(fmt_ts(&snapshot.created_at)),
            details_json: Set(Value::Object(snapshot.details.clone()).to_string()),
        };
        snapshots::Entity::insert(am)
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error in insert_snapshot: {e}");
                StorageError::WriteFailed
            })?;
        Ok(())
    }

    async fn list_snapshots(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<RiskScoreSnapshot>, StorageError> {
        let rows = snapshots::Entity::find()
            .filter(snapshots::Column::SessionId.eq(session_id.to_string()))
            .order_by_asc(snapshots::Column::CreatedAt)
            .all(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in list_snapshots: {e}");
                StorageError::ReadFailed
            })?;
        rows.into_iter().map(Self::from_snapshot_model).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::SessionStatus;
    use tempfile::TempDir;

    async fn temp_db() -> (TempDir, DatabaseStorage) {
        let dir = TempDir::new().unwrap();
        let storage = DatabaseStorage::new_file(dir.path().join("test.sqlite3"))
            .await
            .unwrap();
        (dir, storage)
    }

    fn identity(attempt: i32) -> SessionIdentity {
        SessionIdentity {
            tenant_id: "t1".into(),
            exam_schedule_id: "e1".into(),
            user_id: "u1".into(),
            attempt_no: attempt,
        }
    }

    fn event_for(session_id: Uuid, event_id: &str) -> AnomalyEvent {
        AnomalyEvent {
            event_id: event_id.into(),
            session_id,
            event_type: "LOOK_AWAY".into(),
            event_time: Utc::now(),
            severity: Severity::Medium,
            confidence: Some(0.8),
            details: Map::new(),
            evidence_id: None,
            thumbnail_meta: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn session_roundtrip_by_id_and_identity() {
        let (_dir, storage) = temp_db().await;
        let session = Session::started(identity(1), Map::new());
        storage.save_session(&session).await.unwrap();

        let by_id = storage.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(by_id.identity, identity(1));
        assert_eq!(by_id.status, SessionStatus::Active);

        let by_identity = storage
            .find_session_by_identity(&identity(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_identity.id, session.id);

        assert!(storage
            .find_session_by_identity(&identity(2))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn identity_tuple_is_unique() {
        let (_dir, storage) = temp_db().await;
        storage
            .save_session(&Session::started(identity(1), Map::new()))
            .await
            .unwrap();
        let rival = Session::started(identity(1), Map::new());
        assert!(matches!(
            storage.save_session(&rival).await,
            Err(StorageError::DuplicateEvent)
        ));
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected() {
        let (_dir, storage) = temp_db().await;
        let session = Session::started(identity(1), Map::new());
        storage.save_session(&session).await.unwrap();

        storage.insert_event(&event_for(session.id, "e1")).await.unwrap();
        assert!(matches!(
            storage.insert_event(&event_for(session.id, "e1")).await,
            Err(StorageError::DuplicateEvent)
        ));
        assert_eq!(storage.list_events(session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn event_write_to_ended_session_is_refused() {
        let (_dir, storage) = temp_db().await;
        let mut session = Session::started(identity(1), Map::new());
        storage.save_session(&session).await.unwrap();
        session.status = SessionStatus::Ended;
        session.ended_at = Some(Utc::now());
        storage.save_session(&session).await.unwrap();

        assert!(matches!(
            storage.insert_event(&event_for(session.id, "late")).await,
            Err(StorageError::SessionEnded)
        ));
    }

    #[tokio::test]
    async fn risk_score_update_is_conditional() {
        let (_dir, storage) = temp_db().await;
        let session = Session::started(identity(1), Map::new());
        storage.save_session(&session).await.unwrap();

        assert!(storage.try_update_risk_score(session.id, 0.0, 4.0).await.unwrap());
        // Stale expectation loses.
        assert!(!storage.try_update_risk_score(session.id, 0.0, 8.0).await.unwrap());
        let fresh = storage.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(fresh.current_risk_score, 4.0);
    }

    #[tokio::test]
    async fn stale_sweep_only_touches_active_sessions() {
        let (_dir, storage) = temp_db().await;
        let mut stale = Session::started(identity(1), Map::new());
        stale.last_heartbeat_at = Utc::now() - chrono::Duration::minutes(20);
        storage.save_session(&stale).await.unwrap();

        let fresh = Session::started(identity(2), Map::new());
        storage.save_session(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(10);
        let swept = storage.end_stale_sessions(cutoff, Utc::now()).await.unwrap();
        assert_eq!(swept, 1);
        // Idempotent: the stale session is already ENDED.
        assert_eq!(storage.end_stale_sessions(cutoff, Utc::now()).await.unwrap(), 0);

        let ended = storage.find_session(stale.id).await.unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());
        let untouched = storage.find_session(fresh.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn evidence_attach_links_back_to_event() {
        let (_dir, storage) = temp_db().await;
        let session = Session::started(identity(1), Map::new());
        storage.save_session(&session).await.unwrap();
        storage.insert_event(&event_for(session.id, "e1")).await.unwrap();

        let evidence = Evidence {
            id: Uuid::new_v4(),
            session_id: session.id,
            byte_size: 3,
            sha256: "abc".into(),
            mime_type: "image/jpeg".into(),
            locator: format!("{}/thumb-e1.jpg", session.id),
            created_at: Utc::now(),
        };
        let meta = ThumbnailMeta {
            locator: evidence.locator.clone(),
            size_bytes: 3,
            sha256: "abc".into(),
        };
        storage.attach_evidence("e1", &evidence, &meta).await.unwrap();

        let events = storage.list_events(session.id).await.unwrap();
        assert_eq!(events[0].evidence_id, Some(evidence.id));
        assert_eq!(events[0].thumbnail_meta.as_ref().unwrap().sha256, "abc");

        let found = storage.find_evidence(evidence.id).await.unwrap().unwrap();
        assert_eq!(found.session_id, session.id);
        assert_eq!(storage.list_evidence(session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn alerts_and_snapshots_are_listed_in_order() {
        let (_dir, storage) = temp_db().await;
        let session = Session::started(identity(1), Map::new());
        storage.save_session(&session).await.unwrap();

        for (i, sev) in [Severity::High, Severity::Critical].iter().enumerate() {
            storage
                .insert_alert(&Alert {
                    id: Uuid::new_v4(),
                    session_id: session.id,
                    alert_type: "FACE_MISSING".into(),
                    severity: *sev,
                    created_at: Utc::now() + chrono::Duration::milliseconds(i as i64),
                    triggering_event_id: None,
                    evidence_id: None,
                    details: Map::new(),
                })
                .await
                .unwrap();
        }
        let alerts = storage.list_alerts(session.id).await.unwrap();
        assert_eq!(alerts.len(), 2);
        // Newest first.
        assert_eq!(alerts[0].severity, Severity::Critical);

        for i in 0..3 {
            storage
                .insert_snapshot(&RiskScoreSnapshot {
                    id: Uuid::new_v4(),
                    session_id: session.id,
                    score: i as f64,
                    created_at: Utc::now() + chrono::Duration::milliseconds(i),
                    details: Map::new(),
                })
                .await
                .unwrap();
        }
        let snapshots = storage.list_snapshots(session.id).await.unwrap();
        let times: Vec<_> = snapshots.iter().map(|s| s.created_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[tokio::test]
    async fn repaired_alert_link_is_persisted() {
        let (_dir, storage) = temp_db().await;
        let session = Session::started(identity(1), Map::new());
        storage.save_session(&session).await.unwrap();
        let alert_id = Uuid::new_v4();
        storage
            .insert_alert(&Alert {
                id: alert_id,
                session_id: session.id,
                alert_type: "MULTI_PERSON".into(),
                severity: Severity::Critical,
                created_at: Utc::now(),
                triggering_event_id: None,
                evidence_id: None,
                details: Map::new(),
            })
            .await
            .unwrap();

        let evidence_id = Uuid::new_v4();
        storage.update_alert_evidence(alert_id, evidence_id).await.unwrap();
        let alerts = storage.list_alerts(session.id).await.unwrap();
        assert_eq!(alerts[0].evidence_id, Some(evidence_id));
    }
}
