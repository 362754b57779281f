//! The persistence contract.

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use tracegate_types::{
    BlacklistEntry, CachedLayer, ConnectionStatus, DeliverySession, KeyId, LicenseKeyRecord,
    RateWindow, RequestLogEntry, RotatingTokenRecord, ScriptId, ScriptRecord, SecurityEvent,
    TracepathSessionRecord,
};

/// Namespace for consumed client nonces.
pub const NONCE_NAMESPACE: &str = "nonce";

/// Namespace for consumed request hashes.
pub const REQUEST_HASH_NAMESPACE: &str = "request_hash";

/// Rows removed by [`GateStore::sweep_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub markers: usize,
    pub tokens: usize,
    pub sessions: usize,
    pub blacklist: usize,
}

impl SweepReport {
    /// Total rows removed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.markers + self.tokens + self.sessions + self.blacklist
    }
}

/// Authoritative state shared by every gate instance.
///
/// Every operation that must be atomic across instances (single-use
/// markers, token consumption, tracepath advancement, rate window updates)
/// is a single call here. Expired rows are treated as absent on lookup.
pub trait GateStore: Send + Sync {
    // ── Scripts ──────────────────────────────────────────────────

    fn get_script(&self, id: &ScriptId) -> StoreResult<Option<ScriptRecord>>;
    fn put_script(&self, script: &ScriptRecord) -> StoreResult<()>;

    // ── License keys ─────────────────────────────────────────────

    /// Looks a key up by its secret value.
    fn get_key(&self, value: &str) -> StoreResult<Option<LicenseKeyRecord>>;
    fn get_key_by_id(&self, id: &KeyId) -> StoreResult<Option<LicenseKeyRecord>>;
    /// Inserts or replaces a key, matched by id. For provisioning only;
    /// request-time changes go through [`GateStore::update_key`].
    fn put_key(&self, key: &LicenseKeyRecord) -> StoreResult<()>;
    /// Atomically applies `update` to the current record for `id`. The
    /// record is written back only if `update` returns true. Returns the
    /// record as stored after the call, or `None` for an unknown id.
    /// `update` must not change the key value.
    fn update_key(
        &self,
        id: &KeyId,
        update: &mut dyn FnMut(&mut LicenseKeyRecord) -> bool,
    ) -> StoreResult<Option<LicenseKeyRecord>>;

    /// Bumps the use counter and stamps the last use. No other field is
    /// touched.
    fn record_key_use(
        &self,
        id: &KeyId,
        at: DateTime<Utc>,
        ip: &str,
    ) -> StoreResult<Option<LicenseKeyRecord>> {
        self.update_key(id, &mut |key| {
            key.use_count += 1;
            key.last_used_at = Some(at);
            key.last_ip = Some(ip.to_string());
            true
        })
    }

    /// Compare-and-set hardware id binding. Succeeds only while the stored
    /// lock still equals `expected` and `expected_resets`; the binding
    /// count is then incremented. `None` if the precondition failed.
    fn bind_key_hwid(
        &self,
        id: &KeyId,
        expected: Option<&str>,
        expected_resets: u32,
        hwid_hash: &str,
    ) -> StoreResult<Option<LicenseKeyRecord>> {
        let mut bound = false;
        let stored = self.update_key(id, &mut |key| {
            bound = key.hwid_hash.as_deref() == expected && key.hwid_reset_count == expected_resets;
            if bound {
                key.hwid_hash = Some(hwid_hash.to_string());
                key.hwid_reset_count += 1;
            }
            bound
        })?;
        Ok(stored.filter(|_| bound))
    }

    // ── Blacklist ────────────────────────────────────────────────

    /// Returns the newest active entry naming `ip` or `hwid_hash`.
    fn find_blacklist(
        &self,
        ip: Option<&str>,
        hwid_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<BlacklistEntry>>;
    fn add_blacklist(&self, entry: &BlacklistEntry) -> StoreResult<()>;
    /// Removes every entry naming `ip` or `hwid_hash`. Returns the count.
    fn remove_blacklist(&self, ip: Option<&str>, hwid_hash: Option<&str>) -> StoreResult<usize>;

    // ── Rate windows ─────────────────────────────────────────────

    fn get_rate_window(&self, key: &str) -> StoreResult<Option<RateWindow>>;
    /// Atomically replaces the window for `key` with `update(current)`.
    fn update_rate_window(
        &self,
        key: &str,
        update: &mut dyn FnMut(Option<RateWindow>) -> RateWindow,
    ) -> StoreResult<RateWindow>;

    // ── Single-use markers ───────────────────────────────────────

    /// Records `value` under `namespace` until `expires_at`. Returns false
    /// if a live marker already existed.
    fn mark_once(
        &self,
        namespace: &str,
        value: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    fn is_marked(&self, namespace: &str, value: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    // ── Tracepath sessions ───────────────────────────────────────

    fn put_tracepath(&self, session: &TracepathSessionRecord) -> StoreResult<()>;
    fn get_tracepath(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<TracepathSessionRecord>>;
    /// Compare-and-advance: moves a valid, unexpired session from step
    /// `from` to `to`, stamping `at`. `consume` clears the valid flag.
    /// Returns the updated record, or `None` if the precondition failed.
    fn advance_tracepath(
        &self,
        id: &str,
        from: u8,
        to: u8,
        at: DateTime<Utc>,
        consume: bool,
    ) -> StoreResult<Option<TracepathSessionRecord>>;
    fn invalidate_tracepath(&self, id: &str) -> StoreResult<()>;

    // ── Rotating and session tokens ──────────────────────────────

    fn put_token(&self, token: &RotatingTokenRecord) -> StoreResult<()>;
    fn get_token(&self, token: &str, now: DateTime<Utc>)
    -> StoreResult<Option<RotatingTokenRecord>>;
    /// Atomically marks a live token invalid and returns it. `None` if the
    /// token is unknown, expired or already consumed.
    fn consume_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RotatingTokenRecord>>;

    // ── Delivery sessions ────────────────────────────────────────

    fn put_delivery_session(&self, session: &DeliverySession) -> StoreResult<()>;
    fn get_delivery_session(&self, token: &str) -> StoreResult<Option<DeliverySession>>;
    /// Sets status and reason. Fails with `NotFound` for unknown tokens.
    fn update_delivery_status(
        &self,
        token: &str,
        status: ConnectionStatus,
        reason: Option<&str>,
    ) -> StoreResult<()>;
    /// Stamps a heartbeat. Fails with `NotFound` for unknown tokens.
    fn touch_delivery_session(&self, token: &str, at: DateTime<Utc>) -> StoreResult<()>;
    /// Drops ended sessions last heard from before `ended_before`, and any
    /// session last heard from before `stale_before`. Returns the count.
    fn prune_delivery_sessions(
        &self,
        ended_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<usize>;

    // ── Pipeline layers ──────────────────────────────────────────

    fn get_layer(
        &self,
        script_id: &ScriptId,
        layer: u8,
        version: &str,
    ) -> StoreResult<Option<CachedLayer>>;
    fn put_layer(&self, layer: &CachedLayer) -> StoreResult<()>;

    // ── Warning counters ─────────────────────────────────────────

    /// Increments and returns the warning count for `key_id`.
    fn increment_warnings(&self, key_id: &KeyId) -> StoreResult<u32>;
    fn warnings(&self, key_id: &KeyId) -> StoreResult<u32>;
    fn reset_warnings(&self, key_id: &KeyId) -> StoreResult<()>;

    // ── Request log ──────────────────────────────────────────────

    fn log_request(&self, entry: &RequestLogEntry) -> StoreResult<()>;
    fn count_requests_since(&self, key_id: &KeyId, since: DateTime<Utc>) -> StoreResult<u64>;
    fn distinct_ips_since(&self, key_id: &KeyId, since: DateTime<Utc>) -> StoreResult<u64>;
    /// Drops log rows older than `before`.
    fn prune_request_log(&self, before: DateTime<Utc>) -> StoreResult<usize>;

    // ── Security events ──────────────────────────────────────────

    fn append_event(&self, event: &SecurityEvent) -> StoreResult<()>;
    /// Newest first.
    fn recent_events(&self, limit: usize) -> StoreResult<Vec<SecurityEvent>>;
    /// Drops events recorded before `before`.
    fn prune_events(&self, before: DateTime<Utc>) -> StoreResult<usize>;

    // ── Maintenance ──────────────────────────────────────────────

    /// Deletes expired markers, tokens, tracepath sessions and blacklist
    /// entries.
    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<SweepReport>;
}

/// Shared precondition and mutation for [`GateStore::advance_tracepath`].
pub(crate) fn try_advance(
    session: &mut TracepathSessionRecord,
    from: u8,
    to: u8,
    at: DateTime<Utc>,
    consume: bool,
) -> bool {
    let slot = usize::from(to);
    if !session.valid
        || session.current_step != from
        || session.is_expired(at)
        || slot >= session.step_completed_at.len()
    {
        return false;
    }
    session.current_step = to;
    session.step_completed_at[slot] = Some(at);
    if consume {
        session.valid = false;
    }
    true
}
