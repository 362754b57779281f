//! Base64 transport encoding.
//!
//! Binary payloads travel inside JSON bodies as standard base64.

use crate::error::{ProtocolError, ProtocolResult};
use base64::{engine::general_purpose::STANDARD, Engine};

/// Encodes bytes for transport.
#[must_use]
pub fn encode_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a transport string.
pub fn decode_transport(encoded: &str) -> ProtocolResult<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ProtocolError::Encoding(format!("invalid base64: {e}")))
}

/// Serde adapter storing `Vec<u8>` fields as base64 strings.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes bytes as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserializes bytes from a base64 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
