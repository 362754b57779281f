//! License key checks and hardware-id locking.
//!
//! Every binding of a key to a hardware id counts against
//! `max_hwid_resets`, including the first lock. A key may therefore be
//! bound to at most `max_hwid_resets` distinct devices over its lifetime
//! unless an operator lifts the count.

use crate::error::{LicenseError, LicenseResult};
use crate::hwid::hwid_matches;
use chrono::Duration;
use std::sync::Arc;
use tracegate_store::GateStore;
use tracegate_types::{Clock, KeyId, LicenseKeyRecord, ScriptId};
use tracing::{info, warn};

/// Default number of hardware-id bindings per key.
pub const DEFAULT_MAX_HWID_RESETS: u32 = 2;

/// Verifies keys against the store and maintains their HWID lock.
pub struct KeyChecks {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    max_hwid_resets: u32,
}

impl KeyChecks {
    pub fn new(store: Arc<dyn GateStore>, clock: Arc<dyn Clock>, max_hwid_resets: u32) -> Self {
        Self {
            store,
            clock,
            max_hwid_resets,
        }
    }

    /// Looks a key up by value without checking it.
    pub fn find(&self, value: &str) -> LicenseResult<LicenseKeyRecord> {
        self.store
            .get_key(value.trim())?
            .ok_or(LicenseError::KeyNotFound)
    }

    /// Checks ban, expiry, script binding and hardware id, in that order,
    /// locking or rebinding the key to `hwid_hash` when allowed.
    ///
    /// Changes are written through compare-and-set store calls, so a ban
    /// or reset landing concurrently is never overwritten.
    pub fn verify(
        &self,
        value: &str,
        script_id: &ScriptId,
        hwid_hash: Option<&str>,
    ) -> LicenseResult<LicenseKeyRecord> {
        let now = self.clock.now();
        let mut key = self.find(value)?;

        if key.ban_active(now) {
            return Err(banned(&key));
        }
        if key.banned {
            // temporary ban has lapsed
            key = self
                .store
                .update_key(&key.id, &mut |k| {
                    let lapsed = k.banned && !k.ban_active(now);
                    if lapsed {
                        clear_ban(k);
                    }
                    lapsed
                })?
                .ok_or(LicenseError::KeyNotFound)?;
            if key.ban_active(now) {
                return Err(banned(&key));
            }
            info!(key = %key.id, "temporary key ban lapsed");
        }

        if key.is_expired(now) {
            return Err(LicenseError::Expired("Key"));
        }

        if key.script_id != *script_id {
            return Err(LicenseError::ScriptMismatch {
                issued: key.script_id.to_string(),
                presented: script_id.to_string(),
            });
        }

        for _ in 0..BIND_ATTEMPTS {
            let Some(presented) = self.hwid_change(&key, hwid_hash)? else {
                return Ok(key);
            };
            let bound = self.store.bind_key_hwid(
                &key.id,
                key.hwid_hash.as_deref(),
                key.hwid_reset_count,
                presented,
            )?;
            match bound {
                Some(updated) => {
                    info!(
                        key = %updated.id,
                        rebind = key.hwid_hash.is_some(),
                        resets = updated.hwid_reset_count,
                        "hwid bound"
                    );
                    return Ok(updated);
                }
                None => {
                    key = self
                        .store
                        .get_key_by_id(&key.id)?
                        .ok_or(LicenseError::KeyNotFound)?;
                    if key.ban_active(now) {
                        return Err(banned(&key));
                    }
                }
            }
        }
        warn!(key = %key.id, "hwid binding contended");
        Err(LicenseError::HwidMismatch {
            resets: key.hwid_reset_count,
            max: self.max_hwid_resets,
        })
    }

    /// Records a successful use. Only the usage fields are written.
    pub fn record_use(&self, key: &LicenseKeyRecord, ip: &str) -> LicenseResult<LicenseKeyRecord> {
        self.store
            .record_key_use(&key.id, self.clock.now(), ip)?
            .ok_or(LicenseError::KeyNotFound)
    }

    /// Bans a key. `duration` of `None` is permanent.
    pub fn ban(
        &self,
        key_id: &KeyId,
        reason: &str,
        duration: Option<Duration>,
    ) -> LicenseResult<LicenseKeyRecord> {
        let expires_at = duration.map(|d| self.clock.now() + d);
        let key = self
            .store
            .update_key(key_id, &mut |k| {
                k.banned = true;
                k.ban_reason = Some(reason.to_string());
                k.ban_expires_at = expires_at;
                true
            })?
            .ok_or(LicenseError::KeyNotFound)?;
        warn!(key = %key.id, reason, expires_at = ?key.ban_expires_at, "key banned");
        Ok(key)
    }

    /// Lifts a key ban.
    pub fn unban(&self, key_id: &KeyId) -> LicenseResult<LicenseKeyRecord> {
        let key = self
            .store
            .update_key(key_id, &mut |k| {
                clear_ban(k);
                true
            })?
            .ok_or(LicenseError::KeyNotFound)?;
        info!(key = %key.id, "key unbanned");
        Ok(key)
    }

    /// Operator reset: clears the lock and the binding count.
    pub fn reset_hwid(&self, key_id: &KeyId) -> LicenseResult<LicenseKeyRecord> {
        let key = self
            .store
            .update_key(key_id, &mut |k| {
                k.hwid_hash = None;
                k.hwid_reset_count = 0;
                true
            })?
            .ok_or(LicenseError::KeyNotFound)?;
        info!(key = %key.id, "hwid lock reset");
        Ok(key)
    }

    /// Returns the hash to bind `key` to, or `None` if it needs no change.
    fn hwid_change<'a>(
        &self,
        key: &LicenseKeyRecord,
        hwid_hash: Option<&'a str>,
    ) -> LicenseResult<Option<&'a str>> {
        let Some(presented) = hwid_hash else {
            // a locked key needs a hardware id; an unlocked one stays unlocked
            return match key.hwid_hash {
                Some(_) => Err(LicenseError::HwidMismatch {
                    resets: key.hwid_reset_count,
                    max: self.max_hwid_resets,
                }),
                None => Ok(None),
            };
        };

        if key.hwid_hash.as_deref().is_some_and(|bound| hwid_matches(bound, presented)) {
            return Ok(None);
        }

        if key.hwid_reset_count >= self.max_hwid_resets {
            warn!(key = %key.id, resets = key.hwid_reset_count, "hwid mismatch");
            return Err(LicenseError::HwidMismatch {
                resets: key.hwid_reset_count,
                max: self.max_hwid_resets,
            });
        }
        Ok(Some(presented))
    }
}

/// Attempts at a contended hardware-id bind before giving up.
const BIND_ATTEMPTS: usize = 3;

fn banned(key: &LicenseKeyRecord) -> LicenseError {
    LicenseError::KeyBanned {
        reason: key.ban_reason.clone().unwrap_or_else(|| "banned".to_string()),
        expires_at: key.ban_expires_at,
    }
}

fn clear_ban(key: &mut LicenseKeyRecord) {
    key.banned = false;
    key.ban_reason = None;
    key.ban_expires_at = None;
}
