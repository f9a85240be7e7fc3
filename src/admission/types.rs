//! Wire shapes for the batch endpoint.
//!
//! Field validation happens per event inside the pipeline, not in serde:
//! a malformed member of `events[]` must reject that event with a reason,
//! not fail the whole request body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub session_id: Uuid,
    #[serde(default)]
    pub events: Vec<EventPayload>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    /// ISO-8601 instant; parsed (and bounds-checked) in the pipeline.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailPayload {
    pub event_id: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub data_base64: String,
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

/// Outcome of one batch, mirrored verbatim onto the wire.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub accepted_event_ids: Vec<String>,
    pub rejected_event_ids: Vec<String>,
    pub reason_by_event_id: BTreeMap<String, String>,
}

impl BatchResult {
    pub fn accept(&mut self, event_id: &str) {
        self.accepted_event_ids.push(event_id.to_string());
    }

    pub fn reject(&mut self, event_id: &str, reason: crate::error_handling::types::RejectReason) {
        self.rejected_event_ids.push(event_id.to_string());
        self.reason_by_event_id
            .insert(event_id.to_string(), reason.as_str().to_string());
    }

    pub fn is_accepted(&self, event_id: &str) -> bool {
        self.accepted_event_ids.iter().any(|id| id == event_id)
    }
}
