use std::fmt;

/// Failure verifying the bearer credential presented on a request.
#[derive(Debug)]
pub enum CredentialError {
    MissingToken,
    Malformed(String),
    UnsupportedAlgorithm(String),
    UnknownKey(String),
    BadSignature,
    Expired,
    MissingClaim(&'static str),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::MissingToken => write!(f, "no bearer token presented"),
            CredentialError::Malformed(msg) => write!(f, "malformed token: {}", msg),
            CredentialError::UnsupportedAlgorithm(alg) => {
                write!(f, "unsupported signature algorithm: {}", alg)
            }
            CredentialError::UnknownKey(kid) => write!(f, "no verifying key for kid: {}", kid),
            CredentialError::Expired => write!(f, "token is expired"),
            CredentialError::BadSignature => write!(f, "signature verification failed"),
            CredentialError::MissingClaim(name) => write!(f, "missing required claim: {}", name),
        }
    }
}

impl std::error::Error for CredentialError {}

impl CredentialError {
    /// Stable wire tag, shared by every credential failure.
    pub fn kind(&self) -> &'static str {
        "credential_invalid"
    }
}

/// Per-event rejection reasons reported inside a batch response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Duplicate,
    TimestampOutOfRange,
    RateLimited,
    SessionEnded,
    PayloadInvalid,
    InternalError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Duplicate => "duplicate",
            RejectReason::TimestampOutOfRange => "timestamp_out_of_range",
            RejectReason::RateLimited => "rate_limited",
            RejectReason::SessionEnded => "session_ended",
            RejectReason::PayloadInvalid => "payload_invalid",
            RejectReason::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-wide admission failure (the whole batch is refused).
#[derive(Debug)]
pub enum AdmissionError {
    BatchTooLarge { size: usize, limit: usize },
    IdentityMismatch,
    SessionNotFound,
    Storage(StorageError),
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::BatchTooLarge { size, limit } => {
                write!(f, "batch of {} bytes exceeds limit of {} bytes", size, limit)
            }
            AdmissionError::IdentityMismatch => {
                write!(f, "credential claims do not match session identity")
            }
            AdmissionError::SessionNotFound => write!(f, "session not found"),
            AdmissionError::Storage(e) => write!(f, "storage failure: {}", e),
        }
    }
}

impl std::error::Error for AdmissionError {}

impl AdmissionError {
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::BatchTooLarge { .. } => "batch_too_large",
            AdmissionError::IdentityMismatch => "identity_mismatch",
            AdmissionError::SessionNotFound => "session_not_found",
            AdmissionError::Storage(_) => "internal_error",
        }
    }
}

/// Session lifecycle failures.
#[derive(Debug)]
pub enum SessionError {
    NotFound,
    Ended,
    Storage(StorageError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound => write!(f, "session not found"),
            SessionError::Ended => write!(f, "session has ended"),
            SessionError::Storage(e) => write!(f, "storage failure: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NotFound => "session_not_found",
            SessionError::Ended => "session_ended",
            SessionError::Storage(_) => "internal_error",
        }
    }
}

impl From<StorageError> for SessionError {
    fn from(e: StorageError) -> Self {
        SessionError::Storage(e)
    }
}

/// Durable store failures.
#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    ReadFailed,
    WriteFailed,
    /// Unique-constraint violation on `event_id`.
    DuplicateEvent,
    /// Late write refused because the owning session is ENDED.
    SessionEnded,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "could not open storage backend"),
            StorageError::ReadFailed => write!(f, "storage read failed"),
            StorageError::WriteFailed => write!(f, "storage write failed"),
            StorageError::DuplicateEvent => write!(f, "event already stored"),
            StorageError::SessionEnded => write!(f, "write refused: session has ended"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Ephemeral (KV + sorted set) store failures.
#[derive(Debug)]
pub enum EphemeralError {
    LockPoisoned,
    SnapshotFailed(std::io::Error),
}

impl fmt::Display for EphemeralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EphemeralError::LockPoisoned => write!(f, "ephemeral store lock poisoned"),
            EphemeralError::SnapshotFailed(e) => write!(f, "ephemeral snapshot failed: {}", e),
        }
    }
}

impl std::error::Error for EphemeralError {}

impl From<std::io::Error> for EphemeralError {
    fn from(e: std::io::Error) -> Self {
        EphemeralError::SnapshotFailed(e)
    }
}

/// Event-stream publish/consume failures.
#[derive(Debug)]
pub enum StreamError {
    Closed,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Closed => write!(f, "event stream is closed"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Rules-engine failures. Logged and retried on the next event; they never
/// fail the inducing ingest.
#[derive(Debug)]
pub enum RulesError {
    Storage(StorageError),
    Ephemeral(EphemeralError),
    SessionGone,
}

impl fmt::Display for RulesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RulesError::Storage(e) => write!(f, "rules storage failure: {}", e),
            RulesError::Ephemeral(e) => write!(f, "rules ephemeral failure: {}", e),
            RulesError::SessionGone => write!(f, "session disappeared during evaluation"),
        }
    }
}

impl std::error::Error for RulesError {}

impl From<StorageError> for RulesError {
    fn from(e: StorageError) -> Self {
        RulesError::Storage(e)
    }
}

impl From<EphemeralError> for RulesError {
    fn from(e: EphemeralError) -> Self {
        RulesError::Ephemeral(e)
    }
}

/// Configuration load/validation failures.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "could not read configuration: {}", e),
            ConfigError::Parse(msg) => write!(f, "could not parse configuration: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Web server failures.
#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(msg) => write!(f, "web server bind failed: {}", msg),
        }
    }
}

impl std::error::Error for WebError {}

/// Top-level wiring failures.
#[derive(Debug)]
pub enum ControllerError {
    Config(ConfigError),
    Storage(StorageError),
    Ephemeral(EphemeralError),
    Credential(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Config(e) => write!(f, "configuration error: {}", e),
            ControllerError::Storage(e) => write!(f, "storage init error: {}", e),
            ControllerError::Ephemeral(e) => write!(f, "ephemeral store init error: {}", e),
            ControllerError::Credential(msg) => write!(f, "credential verifier init error: {}", msg),
        }
    }
}

impl std::error::Error for ControllerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reasons_have_stable_names() {
        assert_eq!(RejectReason::Duplicate.as_str(), "duplicate");
        assert_eq!(
            RejectReason::TimestampOutOfRange.as_str(),
            "timestamp_out_of_range"
        );
        assert_eq!(RejectReason::RateLimited.as_str(), "rate_limited");
        assert_eq!(RejectReason::SessionEnded.as_str(), "session_ended");
        assert_eq!(RejectReason::InternalError.as_str(), "internal_error");
    }

    #[test]
    fn admission_error_kinds() {
        assert_eq!(
            AdmissionError::BatchTooLarge { size: 1, limit: 0 }.kind(),
            "batch_too_large"
        );
        assert_eq!(AdmissionError::IdentityMismatch.kind(), "identity_mismatch");
        assert_eq!(AdmissionError::SessionNotFound.kind(), "session_not_found");
    }
}
