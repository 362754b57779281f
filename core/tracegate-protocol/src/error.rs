//! Error types for the wire protocol.

use thiserror::Error;
use tracegate_crypto::CryptoError;
use tracegate_types::GateError;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while building or parsing protocol payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before a complete structure was read.
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// Header announced a protocol version this build does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// Header flags named an unknown frame kind.
    #[error("unknown frame kind {0:#04x}")]
    UnknownFrameKind(u8),

    /// Chunk indices were not sequential.
    #[error("chunk out of order: expected {expected}, found {found}")]
    ChunkOutOfOrder { expected: u32, found: u32 },

    /// Stream ended without a chunk carrying the last flag.
    #[error("stream has no final chunk")]
    MissingFinalChunk,

    /// Bytes remained after the footer.
    #[error("{0} trailing bytes after footer")]
    TrailingData(usize),

    /// Header, footer and body disagree about the payload length.
    #[error("length mismatch: announced {announced}, found {found}")]
    LengthMismatch { announced: u32, found: u32 },

    /// Rolling checksum over the plaintext did not match the footer.
    #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// Stream-level HMAC or per-chunk authentication failed.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// Payload cannot be represented in the frame format.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Chunk size outside the supported range.
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(usize),

    /// XOR key or salt was empty.
    #[error("empty key material")]
    EmptyKeyMaterial,

    /// Stream is obfuscated but no cipher was supplied.
    #[error("stream is obfuscated but no key was supplied")]
    MissingKey,

    /// Transport encoding (base64, hex) was malformed.
    #[error("invalid transport encoding: {0}")]
    Encoding(String),

    /// Underlying primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<ProtocolError> for GateError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Crypto(inner) => inner.into(),
            ProtocolError::PayloadTooLarge(_)
            | ProtocolError::InvalidChunkSize(_)
            | ProtocolError::EmptyKeyMaterial
            | ProtocolError::MissingKey => GateError::InvalidRequest(e.to_string()),
            other => GateError::IntegrityFailure(other.to_string()),
        }
    }
}
