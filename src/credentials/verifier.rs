use std::collections::HashMap;
use std::sync::RwLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signature, VerifyingKey};
use log::{info, warn};
use serde_json::Value;

use crate::configuration::types::CredentialKeySource;
use crate::credentials::claims::Claims;
use crate::error_handling::types::{ConfigError, CredentialError};

enum KeyMaterial {
    Static(VerifyingKey),
    KeySet(HashMap<String, VerifyingKey>),
}

/// Verifies bearer tokens against a configured key source.
///
/// Tokens are compact JWTs (`header.payload.signature`, base64url without
/// padding) signed with Ed25519. With a key-set source the token header must
/// carry the `kid` of the signing key; with a static source any `kid` is
/// ignored. `reload` re-reads the source so operators can rotate keys
/// without a restart.
pub struct CredentialVerifier {
    source: CredentialKeySource,
    keys: RwLock<KeyMaterial>,
}

impl CredentialVerifier {
    pub fn from_source(source: CredentialKeySource) -> Result<Self, ConfigError> {
        let keys = load_key_material(&source)?;
        Ok(Self {
            source,
            keys: RwLock::new(keys),
        })
    }

    /// Re-read the key source. Existing material stays in place on failure.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let fresh = load_key_material(&self.source)?;
        match self.keys.write() {
            Ok(mut guard) => {
                *guard = fresh;
                info!("credential key material reloaded");
                Ok(())
            }
            Err(_) => Err(ConfigError::Invalid("verifier lock poisoned".into())),
        }
    }

    /// Extract the token from an `Authorization: Bearer ...` header value.
    pub fn token_from_header(header: &str) -> Result<&str, CredentialError> {
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(CredentialError::MissingToken)?
            .trim();
        if token.is_empty() {
            return Err(CredentialError::MissingToken);
        }
        Ok(token)
    }

    /// Verify a token and extract its identity claims.
    pub fn verify(&self, token: &str) -> Result<Claims, CredentialError> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => {
                    return Err(CredentialError::Malformed(
                        "expected three dot-separated segments".into(),
                    ))
                }
            };

        let header = decode_json_segment(header_b64)?;
        match header.get("alg").and_then(Value::as_str) {
            Some("EdDSA") => {}
            Some(other) => return Err(CredentialError::UnsupportedAlgorithm(other.to_string())),
            None => return Err(CredentialError::Malformed("header has no alg".into())),
        }

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| CredentialError::Malformed("signature is not base64url".into()))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| CredentialError::Malformed("signature has wrong length".into()))?;

        let signing_input_len = header_b64.len() + 1 + payload_b64.len();
        let signing_input = &token[..signing_input_len];

        let kid = header.get("kid").and_then(Value::as_str);
        {
            let guard = self
                .keys
                .read()
                .map_err(|_| CredentialError::Malformed("verifier lock poisoned".into()))?;
            let key = match (&*guard, kid) {
                (KeyMaterial::Static(key), _) => key,
                (KeyMaterial::KeySet(set), Some(kid)) => set
                    .get(kid)
                    .ok_or_else(|| CredentialError::UnknownKey(kid.to_string()))?,
                (KeyMaterial::KeySet(_), None) => {
                    return Err(CredentialError::UnknownKey("<none>".into()))
                }
            };
            key.verify_strict(signing_input.as_bytes(), &signature)
                .map_err(|_| CredentialError::BadSignature)?;
        }

        let payload = decode_json_segment(payload_b64)?;
        let exp = payload
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or(CredentialError::MissingClaim("exp"))?;
        if exp <= Utc::now().timestamp() {
            return Err(CredentialError::Expired);
        }

        Claims::from_payload(&payload)
    }
}

fn decode_json_segment(
    segment: &str,
) -> Result<serde_json::Map<String, Value>, CredentialError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| CredentialError::Malformed("segment is not base64url".into()))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(CredentialError::Malformed("segment is not a JSON object".into())),
    }
}

fn load_key_material(source: &CredentialKeySource) -> Result<KeyMaterial, ConfigError> {
    match source {
        CredentialKeySource::StaticKey(path) => {
            let raw = std::fs::read_to_string(path)?;
            let key = decode_verifying_key(raw.trim())
                .map_err(|msg| ConfigError::Invalid(format!("{}: {}", path.display(), msg)))?;
            Ok(KeyMaterial::Static(key))
        }
        CredentialKeySource::KeySet(path) => {
            let raw = std::fs::read_to_string(path)?;
            let table: HashMap<String, String> =
                toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
            if table.is_empty() {
                warn!("credential key-set {} is empty", path.display());
            }
            let mut keys = HashMap::new();
            for (kid, encoded) in table {
                let key = decode_verifying_key(encoded.trim()).map_err(|msg| {
                    ConfigError::Invalid(format!("key {} in {}: {}", kid, path.display(), msg))
                })?;
                keys.insert(kid, key);
            }
            Ok(KeyMaterial::KeySet(keys))
        }
    }
}

/// Decode a base64 (standard alphabet) 32-byte Ed25519 verifying key.
pub fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey, String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| "not valid base64".to_string())?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| "expected 32 key bytes".to_string())?;
    VerifyingKey::from_bytes(&arr).map_err(|_| "not a valid Ed25519 point".to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::json;

    pub fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    pub fn mint(
        key: &SigningKey,
        kid: Option<&str>,
        tenant: &str,
        exam: &str,
        user: &str,
        attempt: i32,
        exp: i64,
    ) -> String {
        let header = match kid {
            Some(kid) => json!({"alg": "EdDSA", "typ": "JWT", "kid": kid}),
            None => json!({"alg": "EdDSA", "typ": "JWT"}),
        };
        let payload = json!({
            "tenant_id": tenant,
            "exam_schedule_id": exam,
            "user_id": user,
            "attempt_no": attempt,
            "exp": exp,
        });
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        );
        let signature = key.sign(signing_input.as_bytes());
        format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        )
    }
}
