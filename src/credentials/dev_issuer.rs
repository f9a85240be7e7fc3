use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::json;
use std::path::Path;

use crate::configuration::types::DeploymentProfile;
use crate::credentials::claims::Claims;
use crate::error_handling::types::ConfigError;

const TOKEN_TTL_SECS: i64 = 3600;

/// Development-only token minting.
///
/// Production never issues credentials; exams receive them from the external
/// issuer. This exists so a local stack can exercise the whole pipeline
/// without that issuer, and it refuses to mint under a production profile
/// no matter how it was configured.
pub struct DevTokenIssuer {
    signing_key: SigningKey,
    profile: DeploymentProfile,
}

impl DevTokenIssuer {
    /// Load the signing seed (base64, 32 bytes) from a file.
    pub fn from_seed_file(path: &Path, profile: DeploymentProfile) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|_| ConfigError::Invalid(format!("{}: not valid base64", path.display())))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConfigError::Invalid(format!("{}: expected 32 seed bytes", path.display())))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
            profile,
        })
    }

    /// Whether this process may mint tokens at all.
    pub fn enabled(&self) -> bool {
        self.profile.dev_issuer_allowed()
    }

    /// Base64 of the verifying key matching the signing seed, for wiring a
    /// local verifier against this issuer.
    pub fn verifying_key_base64(&self) -> String {
        STANDARD.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Mint a token for the given identity, valid for one hour.
    /// Returns `(token, expires_at_rfc3339)`.
    pub fn mint(&self, claims: &Claims) -> Option<(String, String)> {
        if !self.enabled() {
            return None;
        }
        let now = Utc::now();
        let exp = now + chrono::Duration::seconds(TOKEN_TTL_SECS);
        let header = json!({"alg": "EdDSA", "typ": "JWT"});
        let payload = json!({
            "tenant_id": claims.tenant_id,
            "exam_schedule_id": claims.exam_schedule_id,
            "user_id": claims.user_id,
            "attempt_no": claims.attempt_no,
            "iat": now.timestamp(),
            "exp": exp.timestamp(),
        });
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        );
        let signature = self.signing_key.sign(signing_input.as_bytes());
        let token = format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        );
        Some((token, exp.to_rfc3339()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::CredentialKeySource;
    use crate::credentials::verifier::CredentialVerifier;
    use std::io::Write;

    fn issuer(profile: DeploymentProfile) -> DevTokenIssuer {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{}", STANDARD.encode([3u8; 32])).unwrap();
        let (_, path) = f.keep().unwrap();
        DevTokenIssuer::from_seed_file(&path, profile).unwrap()
    }

    fn dev_claims() -> Claims {
        Claims {
            tenant_id: "dev-tenant".into(),
            exam_schedule_id: "dev-exam".into(),
            user_id: "dev-user".into(),
            attempt_no: 1,
        }
    }

    #[test]
    fn minted_token_verifies_against_matching_key() {
        let issuer = issuer(DeploymentProfile::Local);
        let (token, _) = issuer.mint(&dev_claims()).unwrap();

        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{}", issuer.verifying_key_base64()).unwrap();
        let (_, path) = f.keep().unwrap();
        let verifier =
            CredentialVerifier::from_source(CredentialKeySource::StaticKey(path)).unwrap();

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims, dev_claims());
    }

    #[test]
    fn refuses_to_mint_in_production() {
        let issuer = issuer(DeploymentProfile::Production);
        assert!(issuer.mint(&dev_claims()).is_none());
    }
}
