use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error_handling::types::StreamError;

/// One accepted event as republished for asynchronous rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub session_id: Uuid,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub confidence: Option<f64>,
    pub declared_severity: Option<String>,
    pub details: Map<String, Value>,
}

/// Publish side of the stream. Records with the same `session_id` always
/// land on the same partition.
#[async_trait]
pub trait EventStream: Send + Sync {
    async fn publish(&self, record: EventRecord) -> Result<(), StreamError>;
}

/// In-process partitioned stream over bounded mpsc channels.
///
/// `open` hands back one receiver per partition; the controller runs one
/// consumer worker per receiver. Delivery is per-partition FIFO, which is
/// exactly the per-session ordering guarantee the rules engine needs.
pub struct InProcessStream {
    partitions: Vec<mpsc::Sender<EventRecord>>,
}

impl InProcessStream {
    const PARTITION_DEPTH: usize = 1024;

    pub fn open(partition_count: usize) -> (Self, Vec<mpsc::Receiver<EventRecord>>) {
        let mut senders = Vec::with_capacity(partition_count);
        let mut receivers = Vec::with_capacity(partition_count);
        for _ in 0..partition_count {
            let (tx, rx) = mpsc::channel(Self::PARTITION_DEPTH);
            senders.push(tx);
            receivers.push(rx);
        }
        (Self { partitions: senders }, receivers)
    }

    fn partition_for(&self, session_id: Uuid) -> usize {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions.len()
    }
}

#[async_trait]
impl EventStream for InProcessStream {
    async fn publish(&self, record: EventRecord) -> Result<(), StreamError> {
        let partition = self.partition_for(record.session_id);
        self.partitions[partition].send(record).await.map_err(|_| {
            warn!("event stream partition {} is closed", partition);
            StreamError::Closed
        })
    }
}
