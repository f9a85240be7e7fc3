use super::types::{CredentialKeySource, DeploymentProfile};
use crate::error_handling::types::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration covering every runtime knob.
///
/// Values are read either from command-line arguments (each with an env-var
/// fallback) via [`Configuration::from_args`], or from a TOML file via
/// [`Configuration::from_file`]. Defaults match the documented contract:
/// 64 KiB batches, 600 events/min, 1 h replay TTL, 300 s skew, 10 min stale
/// threshold, 60 s snapshots, 5 min alert cooldown, 0.98 score decay.
#[derive(Parser, Debug, Clone, Deserialize)]
#[command(name = "vigil")]
#[serde(default)]
pub struct Configuration {
    /// Network address to bind the HTTP server to
    #[arg(long, env = "VIGIL_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Port for the HTTP server
    #[arg(long, env = "VIGIL_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Base directory for durable state: SQLite file, evidence blobs, and
    /// the ephemeral-store snapshot all live under this path
    #[arg(long, env = "VIGIL_STORAGE_PATH", default_value = "vigil-data")]
    pub storage_path: PathBuf,

    /// Deployment profile; the dev token issuer only serves under
    /// `local` or `docker`
    #[arg(long, env = "VIGIL_PROFILE", value_enum, default_value = "local")]
    pub profile: DeploymentProfile,

    /// Maximum serialized batch request size in bytes
    #[arg(long, env = "VIGIL_MAX_BATCH_BYTES", default_value_t = 65536)]
    pub max_batch_bytes: usize,

    /// Per-session admission ceiling per wall-clock minute
    #[arg(long, env = "VIGIL_MAX_EVENTS_PER_MINUTE", default_value_t = 600)]
    pub max_events_per_minute: u32,

    /// How long a replay marker suppresses a repeated event id, in seconds
    #[arg(long, env = "VIGIL_REPLAY_TTL_SECS", default_value_t = 3600)]
    pub replay_ttl_secs: u64,

    /// Accepted clock skew between client event time and server time, seconds
    #[arg(long, env = "VIGIL_TIME_SKEW_SECS", default_value_t = 300)]
    pub time_skew_secs: u64,

    /// Sessions with no heartbeat for this long are swept to ENDED, seconds
    #[arg(long, env = "VIGIL_SESSION_STALE_THRESHOLD_SECS", default_value_t = 600)]
    pub session_stale_threshold_secs: u64,

    /// Minimum spacing between risk-score snapshots per session, seconds
    #[arg(long, env = "VIGIL_SNAPSHOT_INTERVAL_SECS", default_value_t = 60)]
    pub snapshot_interval_secs: u64,

    /// Per-(session, type) alert suppression window, seconds
    #[arg(long, env = "VIGIL_ALERT_COOLDOWN_SECS", default_value_t = 300)]
    pub alert_cooldown_secs: u64,

    /// Multiplicative decay applied to the risk score on each event
    #[arg(long, env = "VIGIL_SCORE_DECAY", default_value_t = 0.98)]
    pub score_decay: f64,

    /// File holding a single base64 Ed25519 verifying key
    #[arg(long, env = "VIGIL_CREDENTIAL_KEY_FILE")]
    pub credential_key_file: Option<PathBuf>,

    /// TOML file mapping key ids to base64 Ed25519 verifying keys;
    /// takes precedence over --credential-key-file when both are set
    #[arg(long, env = "VIGIL_CREDENTIAL_KEYSET_FILE")]
    pub credential_keyset_file: Option<PathBuf>,

    /// File holding a base64 Ed25519 signing seed for the dev token issuer
    #[arg(long, env = "VIGIL_CREDENTIAL_SIGNING_KEY_FILE")]
    pub credential_signing_key_file: Option<PathBuf>,

    /// Number of event-stream partitions (one rules worker per partition)
    #[arg(long, env = "VIGIL_STREAM_PARTITIONS", default_value_t = 4)]
    pub stream_partitions: usize,

    /// How often the ephemeral store snapshots itself to disk, seconds
    #[arg(long, env = "VIGIL_EPHEMERAL_SNAPSHOT_INTERVAL_SECS", default_value_t = 30)]
    pub ephemeral_snapshot_interval_secs: u64,

    /// How often the stale-session sweeper runs, seconds
    #[arg(long, env = "VIGIL_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        // clap owns the defaults; parsing a bare argv yields them.
        Configuration::parse_from(["vigil"])
    }
}

impl Configuration {
    /// Parse configuration from command-line arguments and environment.
    pub fn from_args() -> Self {
        Configuration::parse()
    }

    /// Load configuration from a TOML file. Missing keys fall back to the
    /// same defaults as the command line.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Configuration =
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly serve requests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credential_key_file.is_none() && self.credential_keyset_file.is_none() {
            return Err(ConfigError::Invalid(
                "one of credential_key_file or credential_keyset_file is required".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.score_decay) {
            return Err(ConfigError::Invalid(format!(
                "score_decay must be within [0, 1], got {}",
                self.score_decay
            )));
        }
        if self.stream_partitions == 0 {
            return Err(ConfigError::Invalid("stream_partitions must be >= 1".into()));
        }
        Ok(())
    }

    /// Resolved credential key source; key-set wins when both are configured.
    pub fn credential_key_source(&self) -> Result<CredentialKeySource, ConfigError> {
        if let Some(ref keyset) = self.credential_keyset_file {
            return Ok(CredentialKeySource::KeySet(keyset.clone()));
        }
        if let Some(ref key) = self.credential_key_file {
            return Ok(CredentialKeySource::StaticKey(key.clone()));
        }
        Err(ConfigError::Invalid(
            "no credential key source configured".into(),
        ))
    }

    pub fn replay_ttl(&self) -> Duration {
        Duration::from_secs(self.replay_ttl_secs)
    }

    pub fn session_stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_stale_threshold_secs as i64)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage_path.join("vigil.sqlite3")
    }

    pub fn evidence_path(&self) -> PathBuf {
        self.storage_path.join("evidence")
    }

    pub fn ephemeral_snapshot_path(&self) -> PathBuf {
        self.storage_path.join("ephemeral.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_contract() {
        let config = Configuration::default();
        assert_eq!(config.max_batch_bytes, 65536);
        assert_eq!(config.max_events_per_minute, 600);
        assert_eq!(config.replay_ttl_secs, 3600);
        assert_eq!(config.time_skew_secs, 300);
        assert_eq!(config.session_stale_threshold_secs, 600);
        assert_eq!(config.snapshot_interval_secs, 60);
        assert_eq!(config.alert_cooldown_secs, 300);
        assert_eq!(config.score_decay, 0.98);
        assert_eq!(config.profile, DeploymentProfile::Local);
    }

    #[test]
    fn from_file_overrides_and_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "max_events_per_minute = 10\ncredential_key_file = \"/tmp/key.b64\""
        )
        .unwrap();
        let config = Configuration::from_file(f.path()).unwrap();
        assert_eq!(config.max_events_per_minute, 10);
        assert_eq!(config.max_batch_bytes, 65536);
        match config.credential_key_source().unwrap() {
            CredentialKeySource::StaticKey(p) => {
                assert_eq!(p, PathBuf::from("/tmp/key.b64"))
            }
            other => panic!("unexpected key source: {:?}", other),
        }
    }

    #[test]
    fn validate_requires_key_source() {
        let config = Configuration::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn keyset_wins_over_static_key() {
        let mut config = Configuration::default();
        config.credential_key_file = Some(PathBuf::from("/tmp/key.b64"));
        config.credential_keyset_file = Some(PathBuf::from("/tmp/keys.toml"));
        assert!(matches!(
            config.credential_key_source().unwrap(),
            CredentialKeySource::KeySet(_)
        ));
    }
}
