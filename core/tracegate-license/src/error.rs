//! Error types for credential handling.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracegate_crypto::CryptoError;
use tracegate_store::StoreError;
use tracegate_types::GateError;

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Credential-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Token is not `payload.signature` or a part failed to decode.
    #[error("invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// HMAC verification failed.
    #[error("token signature invalid")]
    InvalidSignature,

    /// Payload JSON is malformed or missing required fields.
    #[error("invalid token payload: {0}")]
    InvalidPayload(String),

    /// Token or session lifetime has passed.
    #[error("{0} expired")]
    Expired(&'static str),

    /// Stateful token is unknown, expired or already consumed.
    #[error("token rejected")]
    TokenRejected,

    /// Credential was issued for a different script.
    #[error("credential issued for script {issued}, presented for {presented}")]
    ScriptMismatch { issued: String, presented: String },

    /// Credential bound to a different hardware id or address.
    #[error("credential binding mismatch: {0}")]
    BindingMismatch(&'static str),

    /// Rotation counter passed its ceiling.
    #[error("token step {step} exceeds max step {max_step}")]
    StepLimitExceeded { step: u32, max_step: u32 },

    /// Tracepath step called out of order or after completion.
    #[error("tracepath expected {expected}, got {found}")]
    SequenceViolation { expected: String, found: String },

    /// No key with the presented value.
    #[error("license key not found")]
    KeyNotFound,

    /// Key banned.
    #[error("license key banned: {reason}")]
    KeyBanned {
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },

    /// Key locked to another hardware id with no resets left.
    #[error("hardware id mismatch, {resets} of {max} resets used")]
    HwidMismatch { resets: u32, max: u32 },

    /// A hardware id was required but not supplied or was unusable.
    #[error("invalid hardware id: {0}")]
    InvalidHwid(&'static str),

    /// Underlying primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Persistent store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<LicenseError> for GateError {
    fn from(e: LicenseError) -> Self {
        match e {
            LicenseError::InvalidTokenFormat(_)
            | LicenseError::InvalidSignature
            | LicenseError::InvalidPayload(_)
            | LicenseError::TokenRejected => GateError::InvalidCredential("Invalid token".into()),
            LicenseError::Expired(subject) => GateError::Expired(subject.to_string()),
            LicenseError::ScriptMismatch { .. } => {
                GateError::InvalidCredential("Credential not valid for this script".into())
            }
            LicenseError::BindingMismatch(_) => {
                GateError::InvalidCredential("Credential binding mismatch".into())
            }
            LicenseError::StepLimitExceeded { .. } => {
                GateError::InvalidCredential("Token rotation limit reached".into())
            }
            LicenseError::SequenceViolation { expected, found } => {
                GateError::SequenceViolation(format!("expected {expected}, got {found}"))
            }
            LicenseError::KeyNotFound => GateError::InvalidCredential("Invalid key".into()),
            LicenseError::KeyBanned { reason, expires_at } => {
                GateError::Banned { reason, expires_at }
            }
            LicenseError::HwidMismatch { .. } => {
                GateError::InvalidCredential("HWID mismatch".into())
            }
            LicenseError::InvalidHwid(reason) => GateError::InvalidRequest(reason.to_string()),
            LicenseError::Crypto(inner) => inner.into(),
            LicenseError::Store(inner) => inner.into(),
            LicenseError::Serialization(_) => GateError::InvalidCredential("Invalid token".into()),
        }
    }
}
