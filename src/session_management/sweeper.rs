use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info};
use tokio::sync::broadcast;

use crate::storage::storage_trait::Storage;

/// Periodic task ending sessions whose heartbeats have gone stale.
///
/// Clients that crash or lose connectivity never call `end`; the sweeper
/// closes their sessions once `last_heartbeat_at` is older than the stale
/// threshold. The sweep is a single conditional UPDATE, so running it again
/// (or on several instances) is harmless.
pub struct SessionSweeper {
    storage: Arc<dyn Storage>,
    interval: Duration,
    stale_threshold: chrono::Duration,
}

impl SessionSweeper {
    pub fn new(
        storage: Arc<dyn Storage>,
        interval: Duration,
        stale_threshold: chrono::Duration,
    ) -> Self {
        Self {
            storage,
            interval,
            stale_threshold,
        }
    }

    /// One sweep pass. Returns how many sessions were ended.
    pub async fn sweep_once(&self) -> u64 {
        let now = Utc::now();
        match self
            .storage
            .end_stale_sessions(now - self.stale_threshold, now)
            .await
        {
            Ok(0) => 0,
            Ok(count) => {
                info!("sweeper ended {} stale session(s)", count);
                count
            }
            Err(e) => {
                error!("session sweep failed: {}", e);
                0
            }
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("session sweeper stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::session::{Session, SessionIdentity};
    use crate::session_management::SessionStatus;
    use crate::storage::database_storage::DatabaseStorage;
    use serde_json::Map;
    use tempfile::TempDir;

    #[tokio::test]
    async fn sweep_ends_only_stale_sessions() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            DatabaseStorage::new_file(dir.path().join("test.sqlite3"))
                .await
                .unwrap(),
        );

        let mut stale = Session::started(
            SessionIdentity {
                tenant_id: "t1".into(),
                exam_schedule_id: "e1".into(),
                user_id: "u1".into(),
                attempt_no: 1,
            },
            Map::new(),
        );
        stale.last_heartbeat_at = Utc::now() - chrono::Duration::minutes(30);
        storage.save_session(&stale).await.unwrap();

        let fresh = Session::started(
            SessionIdentity {
                tenant_id: "t1".into(),
                exam_schedule_id: "e1".into(),
                user_id: "u2".into(),
                attempt_no: 1,
            },
            Map::new(),
        );
        storage.save_session(&fresh).await.unwrap();

        let sweeper = SessionSweeper::new(
            storage.clone(),
            Duration::from_secs(60),
            chrono::Duration::minutes(10),
        );
        assert_eq!(sweeper.sweep_once().await, 1);
        assert_eq!(sweeper.sweep_once().await, 0);

        let swept = storage.find_session(stale.id).await.unwrap().unwrap();
        assert_eq!(swept.status, SessionStatus::Ended);
        let kept = storage.find_session(fresh.id).await.unwrap().unwrap();
        assert_eq!(kept.status, SessionStatus::Active);
    }
}
