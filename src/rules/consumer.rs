use std::sync::Arc;

use log::{error, info};
use tokio::sync::{broadcast, mpsc};

use crate::rules::engine::RulesEngine;
use crate::stream::event_stream::EventRecord;

/// Asynchronous execution path of the rules engine: one worker per stream
/// partition, draining records in order. Because partitioning is by
/// `session_id`, a session's events are never evaluated concurrently here.
pub struct RulesConsumer {
    engine: Arc<RulesEngine>,
    partition: usize,
}

impl RulesConsumer {
    pub fn new(engine: Arc<RulesEngine>, partition: usize) -> Self {
        Self { engine, partition }
    }

    pub async fn run(
        self,
        mut records: mpsc::Receiver<EventRecord>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("rules consumer for partition {} started", self.partition);
        loop {
            tokio::select! {
                record = records.recv() => {
                    match record {
                        Some(record) => self.handle(record).await,
                        None => {
                            info!("partition {} closed, consumer exiting", self.partition);
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    // Drain whatever was already published before stopping.
                    while let Ok(record) = records.try_recv() {
                        self.handle(record).await;
                    }
                    info!("rules consumer for partition {} stopping", self.partition);
                    break;
                }
            }
        }
        self.engine.flush_pending_snapshots().await;
    }

    async fn handle(&self, record: EventRecord) {
        let event_id = record.event_id.clone();
        if let Err(e) = self.engine.evaluate(&record).await {
            // Logged and retried on the next event; never fails ingest.
            error!(
                "async evaluation of event {} on partition {} failed: {}",
                event_id, self.partition, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeral::memory_store::MemoryEphemeralStore;
    use crate::session_management::session::{Session, SessionIdentity};
    use crate::storage::database_storage::DatabaseStorage;
    use crate::storage::storage_trait::Storage;
    use crate::storage::types::Severity;
    use crate::stream::event_stream::{EventStream, InProcessStream};
    use chrono::Utc;
    use serde_json::Map;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn consumer_evaluates_streamed_events() {
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

        let (stream, mut receivers) = InProcessStream::open(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        let consumer = RulesConsumer::new(engine, 0);
        let handle = tokio::spawn(consumer.run(receivers.remove(0), shutdown_tx.subscribe()));

        stream
            .publish(EventRecord {
                event_id: "m1".into(),
                session_id: session.id,
                event_type: "MULTI_PERSON".into(),
                event_time: Utc::now(),
                confidence: Some(0.95),
                declared_severity: None,
                details: Map::new(),
            })
            .await
            .unwrap();

        // Give the worker a moment, then stop it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let alerts = storage.list_alerts(session.id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }
}
