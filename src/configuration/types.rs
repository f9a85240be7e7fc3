use serde::Deserialize;
use std::path::PathBuf;

/// Deployment profile the process runs under.
///
/// The unsigned development token issuer is compiled in but refuses to serve
/// unless the profile is `local` or `docker`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentProfile {
    #[value(name = "local")]
    Local,
    #[value(name = "docker")]
    Docker,
    #[value(name = "production")]
    Production,
}

impl Default for DeploymentProfile {
    fn default() -> Self {
        Self::Local
    }
}

impl DeploymentProfile {
    /// Whether the dev-only token issuance endpoint may serve requests.
    pub fn dev_issuer_allowed(&self) -> bool {
        matches!(self, DeploymentProfile::Local | DeploymentProfile::Docker)
    }
}

/// Where verifying keys for bearer credentials come from.
///
/// A single static key file holds one base64 Ed25519 public key. A key-set
/// file is a TOML table of `kid = "base64-public-key"` entries and supports
/// rotation: tokens carry the `kid` of the key that signed them.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKeySource {
    StaticKey(PathBuf),
    KeySet(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_issuer_gate_follows_profile() {
        assert!(DeploymentProfile::Local.dev_issuer_allowed());
        assert!(DeploymentProfile::Docker.dev_issuer_allowed());
        assert!(!DeploymentProfile::Production.dev_issuer_allowed());
    }
}
