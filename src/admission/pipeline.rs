use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::admission::types::{BatchRequest, BatchResult, EventPayload, ThumbnailPayload};
use crate::configuration::config::Configuration;
use crate::credentials::claims::Claims;
use crate::ephemeral::store_trait::EphemeralStore;
use crate::error_handling::types::{AdmissionError, RejectReason, StorageError};
use crate::rules::engine::RulesEngine;
use crate::session_management::session::{Session, SessionIdentity};
use crate::storage::blob_store::BlobStore;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{AnomalyEvent, Evidence, Severity, ThumbnailMeta};
use crate::stream::event_stream::{EventRecord, EventStream};

/// Soft cap on a single thumbnail; larger payloads are logged and dropped.
const THUMBNAIL_SOFT_CAP: usize = 10 * 1024;
/// Rate counters outlive their minute by one more, like the original keys.
const RATE_COUNTER_TTL: Duration = Duration::from_secs(120);

pub struct AdmissionPipeline {
    storage: Arc<dyn Storage>,
    ephemeral: Arc<dyn EphemeralStore>,
    blobs: Arc<dyn BlobStore>,
    rules: Arc<RulesEngine>,
    stream: Option<Arc<dyn EventStream>>,
    max_batch_bytes: usize,
    max_events_per_minute: u32,
    replay_ttl: Duration,
    time_skew_secs: i64,
}

impl AdmissionPipeline {
    pub fn new(
        storage: Arc<dyn Storage>,
        ephemeral: Arc<dyn EphemeralStore>,
        blobs: Arc<dyn BlobStore>,
        rules: Arc<RulesEngine>,
        stream: Option<Arc<dyn EventStream>>,
        config: &Configuration,
    ) -> Self {
        Self {
            storage,
            ephemeral,
            blobs,
            rules,
            stream,
            max_batch_bytes: config.max_batch_bytes,
            max_events_per_minute: config.max_events_per_minute,
            replay_ttl: config.replay_ttl(),
            time_skew_secs: config.time_skew_secs as i64,
        }
    }

    /// Admit one batch. `serialized_len` is the size of the request body as
    /// received, before any parsing.
    pub async fn process(
        &self,
        claims: &Claims,
        serialized_len: usize,
        request: BatchRequest,
    ) -> Result<BatchResult, AdmissionError> {
        if serialized_len > self.max_batch_bytes {
            return Err(AdmissionError::BatchTooLarge {
                size: serialized_len,
                limit: self.max_batch_bytes,
            });
        }

        let session = self
            .storage
            .find_session(request.session_id)
            .await
            .map_err(AdmissionError::Storage)?
            .ok_or(AdmissionError::SessionNotFound)?;
        if session.identity != SessionIdentity::from(claims) {
            warn!(
                "identity mismatch on session {}: tenant {} presented",
                session.id, claims.tenant_id
            );
            return Err(AdmissionError::IdentityMismatch);
        }

        let mut result = BatchResult::default();
        for payload in &request.events {
            let event_id = match payload.event_id.as_deref() {
                Some(id) if !id.trim().is_empty() => id,
                // Nothing to report a rejection against.
                _ => continue,
            };
            if let Err(reason) = self.admit_event(&session, event_id, payload).await {
                result.reject(event_id, reason);
            } else {
                result.accept(event_id);
            }
        }

        for thumbnail in &request.thumbnails {
            if !result.is_accepted(&thumbnail.event_id) {
                continue;
            }
            // Evidence failures never demote an accepted event.
            if let Err(e) = self.store_thumbnail(&session, thumbnail).await {
                error!(
                    "thumbnail for event {} on session {} failed: {}",
                    thumbnail.event_id, session.id, e
                );
            }
        }

        debug!(
            "batch on session {}: {} accepted, {} rejected",
            session.id,
            result.accepted_event_ids.len(),
            result.rejected_event_ids.len()
        );
        Ok(result)
    }

    /// Steps b-f of the per-event loop. Any rejection after the replay
    /// marker was claimed must release it again, otherwise a client retry
    /// would read as `duplicate` instead of being admitted.
    async fn admit_event(
        &self,
        session: &Session,
        event_id: &str,
        payload: &EventPayload,
    ) -> Result<(), RejectReason> {
        let replay_key = format!("replay:{}", event_id);
        let fresh = self
            .ephemeral
            .set_if_absent(&replay_key, self.replay_ttl)
            .await
            .map_err(|e| {
                error!("replay check for {} failed: {}", event_id, e);
                RejectReason::InternalError
            })?;
        if !fresh {
            return Err(RejectReason::Duplicate);
        }

        match self.admit_marked_event(session, event_id, payload).await {
            Ok(record) => {
                // Inline rule hook; failures are logged and retried on the
                // next event, never surfaced to the client.
                if let Err(e) = self.rules.evaluate(&record).await {
                    error!("inline rule hook for {} failed: {}", event_id, e);
                }
                if let Some(ref stream) = self.stream {
                    if let Err(e) = stream.publish(record).await {
                        error!("stream publish for {} failed: {}", event_id, e);
                    }
                }
                Ok(())
            }
            Err(reason) => {
                if reason != RejectReason::Duplicate {
                    if let Err(e) = self.ephemeral.remove(&replay_key).await {
                        error!("releasing replay marker for {} failed: {}", event_id, e);
                    }
                }
                Err(reason)
            }
        }
    }

    async fn admit_marked_event(
        &self,
        session: &Session,
        event_id: &str,
        payload: &EventPayload,
    ) -> Result<EventRecord, RejectReason> {
        let event_type = match payload.event_type.as_deref() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => return Err(RejectReason::PayloadInvalid),
        };
        let event_time = payload
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or(RejectReason::PayloadInvalid)?;

        let now = Utc::now();
        if (now - event_time).num_seconds().abs() > self.time_skew_secs {
            return Err(RejectReason::TimestampOutOfRange);
        }

        let rate_key = format!("rate:{}:{}", session.id, now.timestamp() / 60);
        let admitted_this_minute = self
            .ephemeral
            .increment(&rate_key, RATE_COUNTER_TTL)
            .await
            .map_err(|e| {
                error!("rate counter for session {} failed: {}", session.id, e);
                RejectReason::InternalError
            })?;
        if admitted_this_minute > i64::from(self.max_events_per_minute) {
            return Err(RejectReason::RateLimited);
        }

        let severity = payload
            .severity
            .as_deref()
            .and_then(|s| s.parse::<Severity>().ok())
            .unwrap_or(Severity::Low);
        let event = AnomalyEvent {
            event_id: event_id.to_string(),
            session_id: session.id,
            event_type: event_type.clone(),
            event_time,
            severity,
            confidence: payload.confidence,
            details: payload.details.clone(),
            evidence_id: None,
            thumbnail_meta: None,
            created_at: now,
        };
        match self.storage.insert_event(&event).await {
            Ok(()) => {}
            // Second line of defense: someone else persisted this id.
            Err(StorageError::DuplicateEvent) => return Err(RejectReason::Duplicate),
            Err(StorageError::SessionEnded) => return Err(RejectReason::SessionEnded),
            Err(e) => {
                error!("persisting event {} failed: {}", event_id, e);
                return Err(RejectReason::InternalError);
            }
        }

        Ok(EventRecord {
            event_id: event_id.to_string(),
            session_id: session.id,
            event_type,
            event_time,
            confidence: payload.confidence,
            declared_severity: payload.severity.clone(),
            details: payload.details.clone(),
        })
    }

    async fn store_thumbnail(
        &self,
        session: &Session,
        thumbnail: &ThumbnailPayload,
    ) -> Result<(), StorageError> {
        let bytes = match STANDARD.decode(thumbnail.data_base64.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("thumbnail for {} is not valid base64: {}", thumbnail.event_id, e);
                return Ok(());
            }
        };
        if bytes.len() > THUMBNAIL_SOFT_CAP {
            warn!(
                "thumbnail for {} is {} bytes, over the {} byte cap; dropped",
                thumbnail.event_id,
                bytes.len(),
                THUMBNAIL_SOFT_CAP
            );
            return Ok(());
        }

        let sha256 = hex_digest(&bytes);
        let locator = self
            .blobs
            .put(session.id, &thumbnail.event_id, &bytes)
            .await?;
        let evidence = Evidence {
            id: Uuid::new_v4(),
            session_id: session.id,
            byte_size: bytes.len() as i64,
            sha256: sha256.clone(),
            mime_type: thumbnail
                .content_type
                .clone()
                .unwrap_or_else(|| "image/jpeg".to_string()),
            locator: locator.clone(),
            created_at: Utc::now(),
        };
        let meta = ThumbnailMeta {
            locator,
            size_bytes: bytes.len() as i64,
            sha256,
        };
        self.storage
            .attach_evidence(&thumbnail.event_id, &evidence, &meta)
            .await?;
        info!(
            "evidence {} stored for event {} on session {}",
            evidence.id, thumbnail.event_id, session.id
        );
        Ok(())
    }
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .fold(String::with_capacity(64), |mut acc, b| {
            acc.push_str(&format!("{:02x}", b));
            acc
        })
}
