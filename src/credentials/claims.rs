use crate::error_handling::types::CredentialError;
use serde_json::Value;

/// Identity claims carried by a verified bearer token.
///
/// The four-field tuple is the logical session identity; two tokens with the
/// same tuple refer to the same session regardless of when they were issued,
/// which is what makes credential refresh transparent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub tenant_id: String,
    pub exam_schedule_id: String,
    pub user_id: String,
    pub attempt_no: i32,
}

impl Claims {
    /// Extract the required claims from a decoded token payload.
    ///
    /// `attempt_no` is accepted as either a JSON number or a numeric string;
    /// issuers disagree on this and both forms are in the wild.
    pub fn from_payload(payload: &serde_json::Map<String, Value>) -> Result<Self, CredentialError> {
        let tenant_id = string_claim(payload, "tenant_id")?;
        let exam_schedule_id = string_claim(payload, "exam_schedule_id")?;
        let user_id = string_claim(payload, "user_id")?;
        let attempt_no = match payload.get("attempt_no") {
            Some(Value::Number(n)) => n
                .as_i64()
                .map(|v| v as i32)
                .ok_or(CredentialError::MissingClaim("attempt_no"))?,
            Some(Value::String(s)) => s
                .parse::<i32>()
                .map_err(|_| CredentialError::MissingClaim("attempt_no"))?,
            _ => return Err(CredentialError::MissingClaim("attempt_no")),
        };
        Ok(Claims {
            tenant_id,
            exam_schedule_id,
            user_id,
            attempt_no,
        })
    }
}

fn string_claim(
    payload: &serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<String, CredentialError> {
    match payload.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(CredentialError::MissingClaim(name)),
    }
}
