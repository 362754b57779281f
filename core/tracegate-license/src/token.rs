//! Stateful rotating and session tokens.
//!
//! Tokens are stored with a short TTL and a step counter. Consumption is
//! atomic in the store; a token consumed on this instance is also
//! remembered locally so a replay on the same instance is rejected without
//! a store round trip.

use crate::error::{LicenseError, LicenseResult};
use crate::hwid::hwid_matches;
use chrono::Duration;
use std::sync::Arc;
use tracegate_crypto::generate_token;
use tracegate_guard::DenyCache;
use tracegate_store::GateStore;
use tracegate_types::{Clock, KeyId, RotatingTokenRecord, ScriptId, TokenKind};
use tracing::{debug, warn};

/// Shortest token lifetime.
pub const MIN_TOKEN_TTL_SECS: i64 = 15;

/// Longest token lifetime.
pub const MAX_TOKEN_TTL_SECS: i64 = 30;

/// Default rotation ceiling.
pub const DEFAULT_MAX_STEP: u32 = 8;

const TOKEN_BYTES: usize = 32;

/// What a new token is bound to.
#[derive(Debug, Clone, Copy)]
pub struct TokenBinding<'a> {
    pub script_id: ScriptId,
    pub hwid_hash: Option<&'a str>,
    pub ip: &'a str,
    pub key_id: Option<KeyId>,
}

/// Issues, consumes and rotates stored tokens.
pub struct TokenIssuer {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_step: u32,
    consumed: DenyCache<()>,
}

impl TokenIssuer {
    /// `ttl_secs` is clamped to
    /// [`MIN_TOKEN_TTL_SECS`]..=[`MAX_TOKEN_TTL_SECS`].
    pub fn new(store: Arc<dyn GateStore>, clock: Arc<dyn Clock>, ttl_secs: i64, max_step: u32) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(ttl_secs.clamp(MIN_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS)),
            max_step,
            consumed: DenyCache::default(),
        }
    }

    /// Effective token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a single-use rotating token at step 0.
    pub fn issue_rotating(&self, binding: TokenBinding<'_>) -> LicenseResult<RotatingTokenRecord> {
        self.issue(TokenKind::Rotating, binding, 0)
    }

    /// Issues the script-scoped session token handed out with a handshake.
    pub fn issue_session(&self, binding: TokenBinding<'_>) -> LicenseResult<RotatingTokenRecord> {
        self.issue(TokenKind::Session, binding, 0)
    }

    /// Atomically consumes `token` and returns its bound metadata.
    ///
    /// Fails if the token is unknown, expired, already consumed, bound to a
    /// different script, or past its rotation ceiling.
    pub fn consume(&self, token: &str, script_id: &ScriptId) -> LicenseResult<RotatingTokenRecord> {
        let now = self.clock.now();
        if self.consumed.get(token, now).is_some() {
            debug!("token already consumed on this instance");
            return Err(LicenseError::TokenRejected);
        }

        let record = self
            .store
            .consume_token(token, now)?
            .ok_or(LicenseError::TokenRejected)?;
        self.consumed.insert(token, (), record.expires_at, now);

        if record.script_id != *script_id {
            warn!(issued = %record.script_id, presented = %script_id, "token presented for another script");
            return Err(LicenseError::ScriptMismatch {
                issued: record.script_id.to_string(),
                presented: script_id.to_string(),
            });
        }
        if record.step > record.max_step {
            return Err(LicenseError::StepLimitExceeded {
                step: record.step,
                max_step: record.max_step,
            });
        }
        Ok(record)
    }

    /// Consumes `token` and issues its successor with `step + 1`, keeping
    /// the hardware id, address and key binding.
    pub fn rotate(
        &self,
        token: &str,
        script_id: &ScriptId,
        hwid_hash: Option<&str>,
    ) -> LicenseResult<RotatingTokenRecord> {
        let previous = self.consume(token, script_id)?;

        if let Some(bound) = previous.hwid_hash.as_deref() {
            if !hwid_hash.is_some_and(|h| hwid_matches(bound, h)) {
                return Err(LicenseError::BindingMismatch("hwid"));
            }
        }

        let step = previous.step + 1;
        if step > previous.max_step {
            return Err(LicenseError::StepLimitExceeded {
                step,
                max_step: previous.max_step,
            });
        }

        let binding = TokenBinding {
            script_id: previous.script_id,
            hwid_hash: previous.hwid_hash.as_deref(),
            ip: &previous.ip,
            key_id: previous.key_id,
        };
        self.issue(previous.kind, binding, step)
    }

    /// Drops expired local cache entries.
    pub fn sweep_cache(&self) -> usize {
        self.consumed.sweep(self.clock.now())
    }

    fn issue(
        &self,
        kind: TokenKind,
        binding: TokenBinding<'_>,
        step: u32,
    ) -> LicenseResult<RotatingTokenRecord> {
        let now = self.clock.now();
        let record = RotatingTokenRecord {
            token: generate_token(TOKEN_BYTES),
            kind,
            script_id: binding.script_id,
            hwid_hash: binding.hwid_hash.map(str::to_string),
            ip: binding.ip.to_string(),
            step,
            max_step: self.max_step,
            valid: true,
            key_id: binding.key_id,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        self.store.put_token(&record)?;
        debug!(%kind, step, script = %record.script_id, "token issued");
        Ok(record)
    }
}
