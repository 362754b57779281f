//! Stateless handshake tokens.
//!
//! Tokens use the format `base64url(payload).base64url(signature)`, where
//! the signature is an HMAC-SHA256 over the base64url-encoded payload
//! string (not the decoded JSON). The payload carries its own absolute
//! expiry, so verification needs no store lookup.

use crate::error::{LicenseError, LicenseResult};
use crate::hwid::hwid_matches;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracegate_crypto::{generate_token, hmac_sign, hmac_verify};
use tracegate_types::ScriptId;

/// Handshake token lifetime in seconds.
pub const HANDSHAKE_TOKEN_TTL_SECS: i64 = 30;

/// The signed handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeClaims {
    /// Script the handshake was opened for.
    pub sid: ScriptId,
    /// Salted HWID hash of the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwid: Option<String>,
    /// Client address at issue time.
    pub ip: String,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Random token id so two tokens issued in the same second differ.
    pub jti: String,
}

impl HandshakeClaims {
    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Issues and verifies handshake tokens under one server secret.
#[derive(Clone)]
pub struct HandshakeSigner {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl HandshakeSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs: HANDSHAKE_TOKEN_TTL_SECS,
        }
    }

    /// Overrides the token lifetime.
    #[must_use]
    pub fn with_ttl_secs(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs.max(1);
        self
    }

    /// Issues a token bound to `script_id`, `hwid_hash` and `ip`.
    pub fn issue(
        &self,
        script_id: ScriptId,
        hwid_hash: Option<&str>,
        ip: &str,
        now: DateTime<Utc>,
    ) -> LicenseResult<(String, HandshakeClaims)> {
        let iat = now.timestamp();
        let claims = HandshakeClaims {
            sid: script_id,
            hwid: hwid_hash.map(str::to_string),
            ip: ip.to_string(),
            iat,
            exp: iat + self.ttl_secs,
            jti: generate_token(8),
        };
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = hmac_sign(payload_b64.as_bytes(), &self.secret)?;
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature);
        Ok((format!("{payload_b64}.{sig_b64}"), claims))
    }

    /// Verifies signature and expiry and returns the claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> LicenseResult<HandshakeClaims> {
        let token = token.trim();

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 2 {
            return Err(LicenseError::InvalidTokenFormat(
                "token must have exactly two parts separated by a dot".to_string(),
            ));
        }
        let payload_b64 = parts[0];
        let signature_b64 = parts[1];

        let sig_bytes = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|e| {
            LicenseError::InvalidTokenFormat(format!("invalid signature base64: {e}"))
        })?;

        hmac_verify(payload_b64.as_bytes(), &self.secret, &sig_bytes)
            .map_err(|_| LicenseError::InvalidSignature)?;

        let payload_json = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|e| {
            LicenseError::InvalidTokenFormat(format!("invalid payload base64: {e}"))
        })?;
        let claims: HandshakeClaims = serde_json::from_slice(&payload_json)
            .map_err(|e| LicenseError::InvalidPayload(format!("invalid payload JSON: {e}")))?;

        if now.timestamp() >= claims.exp {
            return Err(LicenseError::Expired("Handshake token"));
        }
        Ok(claims)
    }

    /// Verifies the token and its binding to `script_id` and `hwid_hash`.
    pub fn verify_for(
        &self,
        token: &str,
        script_id: &ScriptId,
        hwid_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<HandshakeClaims> {
        let claims = self.verify(token, now)?;
        if claims.sid != *script_id {
            return Err(LicenseError::ScriptMismatch {
                issued: claims.sid.to_string(),
                presented: script_id.to_string(),
            });
        }
        if let Some(bound) = claims.hwid.as_deref() {
            if !hwid_bound_matches(bound, hwid_hash) {
                return Err(LicenseError::BindingMismatch("hwid"));
            }
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for HandshakeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeSigner")
            .field("secret", &"[REDACTED]")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

fn hwid_bound_matches(bound: &str, presented: Option<&str>) -> bool {
    presented.is_some_and(|p| hwid_matches(bound, p))
}
