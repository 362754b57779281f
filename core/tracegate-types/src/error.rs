//! The error taxonomy shared by every protocol entry point.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;

/// Errors surfaced by the delivery and session protocol.
///
/// The `String` payloads of [`GateError::InvalidCredential`] and
/// [`GateError::InvalidRequest`] are short public reasons; internal detail
/// belongs in the log line written where the error is raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Missing or unrecognised executor signature.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Bad key, token or request signature.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Tracepath step called out of order, or replayed.
    #[error("tracepath sequence violation: {0}")]
    SequenceViolation(String),

    /// Token, session or key past its lifetime. Carries the subject name.
    #[error("{0} expired")]
    Expired(String),

    /// Nonce or request hash already consumed.
    #[error("replay detected")]
    ReplayDetected,

    /// Too many requests in the current window.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Identifier or key is banned.
    #[error("banned: {reason}")]
    Banned {
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },

    /// Checksum or signature mismatch on delivered content.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// Persistent store or auxiliary service failed or timed out.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Malformed request (missing field, out-of-range parameter).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GateError {
    /// Shorthand for an expired session.
    #[must_use]
    pub fn session_expired() -> Self {
        Self::Expired("Session".to_string())
    }

    /// Returns true for failures that indicate an attack or abuse and must
    /// always be logged with full context.
    #[must_use]
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_)
                | Self::InvalidCredential(_)
                | Self::ReplayDetected
                | Self::Banned { .. }
                | Self::SequenceViolation(_)
        )
    }

    /// Returns the minimal text that may be shown to the client.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Unauthorized(_) => "Unauthorized".to_string(),
            Self::InvalidCredential(reason) => reason.clone(),
            Self::SequenceViolation(_) => "Invalid tracepath sequence".to_string(),
            Self::Expired(subject) => format!("{subject} expired"),
            Self::ReplayDetected => "Replay detected".to_string(),
            Self::RateLimited { .. } => "Rate limit exceeded".to_string(),
            Self::Banned { reason, .. } => format!("Banned: {reason}"),
            Self::IntegrityFailure(_) => "Integrity check failed".to_string(),
            Self::UpstreamUnavailable(_) => "Service temporarily unavailable".to_string(),
            Self::InvalidRequest(reason) => reason.clone(),
        }
    }
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidRequest(format!("malformed payload: {e}"))
    }
}
