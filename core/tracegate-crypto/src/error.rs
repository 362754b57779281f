//! Error types for the crypto primitives.

use thiserror::Error;
use tracegate_types::GateError;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key or tampered data).
    #[error("decryption failed")]
    DecryptionFailed,

    /// Signature did not verify.
    #[error("signature invalid")]
    InvalidSignature,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Hex or other text encoding could not be decoded.
    #[error("invalid encoding: {0}")]
    Encoding(String),
}

impl From<CryptoError> for GateError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidSignature | CryptoError::Encoding(_) => {
                GateError::InvalidCredential("Invalid signature".to_string())
            }
            CryptoError::DecryptionFailed => GateError::IntegrityFailure(e.to_string()),
            other => GateError::UpstreamUnavailable(other.to_string()),
        }
    }
}
