//! Request and response bodies of the protocol endpoints.

use crate::config::ProtectionFlags;
use crate::context::ClientReport;
use crate::pipeline::LOADER_PATH;
use serde::{Deserialize, Serialize};
use tracegate_protocol::ChunkedPayload;
use tracegate_types::{GateError, ScriptId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub key: String,
    pub script_id: String,
    #[serde(default)]
    pub hwid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub success: bool,
    /// Rotating token for the first tracepath step.
    pub token: String,
    /// Script-scoped session token.
    pub script_token: String,
    /// Stateless signed handshake token.
    pub handshake_token: String,
    pub tracepath_session: String,
    /// Per-session salt used for XOR delivery.
    pub salt: String,
    /// Tracepath session expiry, unix seconds.
    pub expires_at: i64,
    /// Rotating token expiry, unix seconds.
    pub token_expires: i64,
}

/// Header-carried inputs of a tracepath step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepRequest {
    pub session_id: String,
    pub hwid: Option<String>,
    /// Rotating token from the previous step.
    pub token: Option<String>,
}

/// Fields common to every tracepath step response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAck {
    pub success: bool,
    pub next_step: String,
    /// Successor rotating token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    #[serde(flatten)]
    pub ack: StepAck,
    pub script_id: ScriptId,
    pub script_name: String,
    pub server_time: i64,
}

/// Where the client goes next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub validate: String,
    pub heartbeat: String,
    pub loader: String,
}

impl Endpoints {
    pub fn for_script(script_id: &ScriptId) -> Self {
        Self {
            validate: "/api/v1/validate".to_string(),
            heartbeat: "/api/v1/heartbeat".to_string(),
            loader: format!("{LOADER_PATH}/{script_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointsResponse {
    #[serde(flatten)]
    pub ack: StepAck,
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagsResponse {
    #[serde(flatten)]
    pub ack: StepAck,
    pub flags: ProtectionFlags,
}

/// How the validated payload is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Base64 of the positional XOR ciphertext.
    #[default]
    Xor,
    /// Framed binary stream, XOR-obfuscated.
    Binary,
    /// AEAD chunk set with a whole-stream signature.
    Chunked,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateRequest {
    pub key: String,
    pub script_id: String,
    pub hwid: Option<String>,
    pub session_id: Option<String>,
    /// Rotating token from the `flags` step.
    pub token: Option<String>,
    pub handshake_token: Option<String>,
    pub nonce: Option<String>,
    /// Hex HMAC-SHA256 of `"{script_id}:{hwid}:{nonce}:{timestamp}"` keyed
    /// with the license key.
    pub signature: Option<String>,
    pub timestamp: Option<i64>,
    pub delivery_mode: DeliveryMode,
    #[serde(flatten)]
    pub report: ClientReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub delivery_mode: DeliveryMode,
    /// XOR mode: base64 ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Binary mode: base64 framed stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_stream: Option<String>,
    /// Binary mode: rolling checksum of the plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_checksum: Option<u32>,
    /// Chunked mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunked: Option<ChunkedPayload>,
    /// XOR salt, for xor and binary modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    /// Unix seconds mixed into the key material.
    pub timestamp: i64,
    /// Token for the heartbeat endpoint.
    pub session_token: String,
    pub heartbeat_interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Failure body of the validation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateFailure {
    pub valid: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub banned: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expired: bool,
}

impl From<&GateError> for ValidateFailure {
    fn from(e: &GateError) -> Self {
        Self {
            valid: false,
            message: e.client_message(),
            banned: matches!(e, GateError::Banned { .. }),
            expired: matches!(e, GateError::Expired(_)),
        }
    }
}

/// Failure body of every other endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl From<&GateError> for ErrorBody {
    fn from(e: &GateError) -> Self {
        Self {
            success: false,
            error: e.client_message(),
        }
    }
}
