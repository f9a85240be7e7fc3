use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::credentials::claims::Claims;
use crate::error_handling::types::{SessionError, StorageError};
use crate::session_management::session::{Session, SessionIdentity};
use crate::session_management::SessionStatus;
use crate::storage::storage_trait::Storage;

/// Lifecycle operations over sessions, keyed by the identity tuple carried
/// in the caller's credential.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Idempotent start. An existing session for the tuple is returned
    /// unchanged whatever its status: re-activating an ENDED attempt would
    /// break the one-way ACTIVE -> ENDED flow, so a consumed attempt stays
    /// consumed and the caller sees its ENDED state.
    pub async fn start(
        &self,
        claims: &Claims,
        config_snapshot: Map<String, Value>,
    ) -> Result<Session, SessionError> {
        let identity = SessionIdentity::from(claims);
        if let Some(existing) = self.storage.find_session_by_identity(&identity).await? {
            debug!("start for existing session {}", existing.id);
            return Ok(existing);
        }

        let session = Session::started(identity.clone(), config_snapshot);
        match self.storage.save_session(&session).await {
            Ok(()) => {
                info!(
                    "session {} started for tenant={} user={} attempt={}",
                    session.id, identity.tenant_id, identity.user_id, identity.attempt_no
                );
                Ok(session)
            }
            // A concurrent start won the unique-index race; hand back its row.
            Err(StorageError::DuplicateEvent) => self
                .storage
                .find_session_by_identity(&identity)
                .await?
                .ok_or(SessionError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Transition ACTIVE -> ENDED. Ending an already-ENDED session is a
    /// no-op success.
    pub async fn end(&self, claims: &Claims) -> Result<Session, SessionError> {
        let identity = SessionIdentity::from(claims);
        let mut session = self
            .storage
            .find_session_by_identity(&identity)
            .await?
            .ok_or(SessionError::NotFound)?;
        if session.status == SessionStatus::Ended {
            return Ok(session);
        }
        session.status = SessionStatus::Ended;
        session.ended_at = Some(Utc::now());
        self.storage.save_session(&session).await?;
        info!("session {} ended", session.id);
        Ok(session)
    }

    /// Refresh the heartbeat on an ACTIVE session.
    pub async fn heartbeat(&self, claims: &Claims) -> Result<Session, SessionError> {
        let identity = SessionIdentity::from(claims);
        let mut session = self
            .storage
            .find_session_by_identity(&identity)
            .await?
            .ok_or(SessionError::NotFound)?;
        if session.status == SessionStatus::Ended {
            return Err(SessionError::Ended);
        }
        let now = Utc::now();
        self.storage.update_heartbeat(session.id, now).await?;
        session.last_heartbeat_at = now;
        Ok(session)
    }

    pub async fn lookup(&self, session_id: Uuid) -> Result<Option<Session>, SessionError> {
        Ok(self.storage.find_session(session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database_storage::DatabaseStorage;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let storage = DatabaseStorage::new_file(dir.path().join("test.sqlite3"))
            .await
            .unwrap();
        (dir, SessionStore::new(Arc::new(storage)))
    }

    fn claims(attempt: i32) -> Claims {
        Claims {
            tenant_id: "t1".into(),
            exam_schedule_id: "e1".into(),
            user_id: "u1".into(),
            attempt_no: attempt,
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_on_identity() {
        let (_dir, store) = store().await;
        let first = store.start(&claims(1), Map::new()).await.unwrap();
        let second = store.start(&claims(1), Map::new()).await.unwrap();
        assert_eq!(first.id, second.id);

        let other_attempt = store.start(&claims(2), Map::new()).await.unwrap();
        assert_ne!(first.id, other_attempt.id);
    }

    #[tokio::test]
    async fn start_captures_config_snapshot() {
        let (_dir, store) = store().await;
        let mut config = Map::new();
        config.insert("username".into(), Value::String("ada".into()));
        let session = store.start(&claims(1), config).await.unwrap();
        let reloaded = store.lookup(session.id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.config_snapshot.get("username"),
            Some(&Value::String("ada".into()))
        );
    }

    #[tokio::test]
    async fn end_is_monotone_and_repeatable() {
        let (_dir, store) = store().await;
        let started = store.start(&claims(1), Map::new()).await.unwrap();
        let ended = store.end(&claims(1)).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());

        let again = store.end(&claims(1)).await.unwrap();
        assert_eq!(again.status, SessionStatus::Ended);
        assert_eq!(again.ended_at, ended.ended_at);

        // A consumed attempt is not reactivated by start.
        let restarted = store.start(&claims(1), Map::new()).await.unwrap();
        assert_eq!(restarted.id, started.id);
        assert_eq!(restarted.status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn heartbeat_requires_active_session() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.heartbeat(&claims(1)).await,
            Err(SessionError::NotFound)
        ));

        let session = store.start(&claims(1), Map::new()).await.unwrap();
        let beaten = store.heartbeat(&claims(1)).await.unwrap();
        assert!(beaten.last_heartbeat_at >= session.last_heartbeat_at);

        store.end(&claims(1)).await.unwrap();
        assert!(matches!(
            store.heartbeat(&claims(1)).await,
            Err(SessionError::Ended)
        ));
    }
}
