//! In-memory store for tests and single-instance development.

use crate::error::{StoreError, StoreResult};
use crate::store::{GateStore, SweepReport, try_advance};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracegate_types::{
    BlacklistEntry, CachedLayer, ConnectionStatus, DeliverySession, KeyId, LicenseKeyRecord,
    RateWindow, RequestLogEntry, RotatingTokenRecord, ScriptId, ScriptRecord, SecurityEvent,
    TracepathSessionRecord,
};

#[derive(Default)]
struct State {
    scripts: HashMap<ScriptId, ScriptRecord>,
    keys: HashMap<KeyId, LicenseKeyRecord>,
    key_values: HashMap<String, KeyId>,
    blacklist: Vec<BlacklistEntry>,
    rate_windows: HashMap<String, RateWindow>,
    markers: HashMap<(String, String), DateTime<Utc>>,
    tracepaths: HashMap<String, TracepathSessionRecord>,
    tokens: HashMap<String, RotatingTokenRecord>,
    deliveries: HashMap<String, DeliverySession>,
    layers: HashMap<(ScriptId, u8, String), CachedLayer>,
    warnings: HashMap<KeyId, u32>,
    requests: Vec<RequestLogEntry>,
    events: Vec<SecurityEvent>,
}

/// [`GateStore`] backed by process-local maps behind one mutex.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl GateStore for MemoryStore {
    fn get_script(&self, id: &ScriptId) -> StoreResult<Option<ScriptRecord>> {
        Ok(self.state.lock().scripts.get(id).cloned())
    }

    fn put_script(&self, script: &ScriptRecord) -> StoreResult<()> {
        self.state.lock().scripts.insert(script.id, script.clone());
        Ok(())
    }

    fn get_key(&self, value: &str) -> StoreResult<Option<LicenseKeyRecord>> {
        let state = self.state.lock();
        Ok(state
            .key_values
            .get(value)
            .and_then(|id| state.keys.get(id))
            .cloned())
    }

    fn get_key_by_id(&self, id: &KeyId) -> StoreResult<Option<LicenseKeyRecord>> {
        Ok(self.state.lock().keys.get(id).cloned())
    }

    fn put_key(&self, key: &LicenseKeyRecord) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(old) = state.keys.insert(key.id, key.clone()) {
            state.key_values.remove(&old.value);
        }
        state.key_values.insert(key.value.clone(), key.id);
        Ok(())
    }

    fn update_key(
        &self,
        id: &KeyId,
        update: &mut dyn FnMut(&mut LicenseKeyRecord) -> bool,
    ) -> StoreResult<Option<LicenseKeyRecord>> {
        let mut state = self.state.lock();
        let Some(stored) = state.keys.get_mut(id) else {
            return Ok(None);
        };
        let mut key = stored.clone();
        if update(&mut key) {
            *stored = key;
        }
        Ok(Some(stored.clone()))
    }

    fn find_blacklist(
        &self,
        ip: Option<&str>,
        hwid_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<BlacklistEntry>> {
        Ok(self
            .state
            .lock()
            .blacklist
            .iter()
            .rev()
            .find(|e| e.is_active(now) && e.matches(ip, hwid_hash))
            .cloned())
    }

    fn add_blacklist(&self, entry: &BlacklistEntry) -> StoreResult<()> {
        self.state.lock().blacklist.push(entry.clone());
        Ok(())
    }

    fn remove_blacklist(&self, ip: Option<&str>, hwid_hash: Option<&str>) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let before = state.blacklist.len();
        state.blacklist.retain(|e| !e.matches(ip, hwid_hash));
        Ok(before - state.blacklist.len())
    }

    fn get_rate_window(&self, key: &str) -> StoreResult<Option<RateWindow>> {
        Ok(self.state.lock().rate_windows.get(key).cloned())
    }

    fn update_rate_window(
        &self,
        key: &str,
        update: &mut dyn FnMut(Option<RateWindow>) -> RateWindow,
    ) -> StoreResult<RateWindow> {
        let mut state = self.state.lock();
        let next = update(state.rate_windows.get(key).cloned());
        state.rate_windows.insert(key.to_string(), next.clone());
        Ok(next)
    }

    fn mark_once(
        &self,
        namespace: &str,
        value: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let slot = (namespace.to_string(), value.to_string());
        match state.markers.get(&slot) {
            Some(exp) if *exp > now => Ok(false),
            _ => {
                state.markers.insert(slot, expires_at);
                Ok(true)
            }
        }
    }

    fn is_marked(&self, namespace: &str, value: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let state = self.state.lock();
        Ok(state
            .markers
            .get(&(namespace.to_string(), value.to_string()))
            .is_some_and(|exp| *exp > now))
    }

    fn put_tracepath(&self, session: &TracepathSessionRecord) -> StoreResult<()> {
        self.state
            .lock()
            .tracepaths
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn get_tracepath(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<TracepathSessionRecord>> {
        Ok(self
            .state
            .lock()
            .tracepaths
            .get(id)
            .filter(|s| !s.is_expired(now))
            .cloned())
    }

    fn advance_tracepath(
        &self,
        id: &str,
        from: u8,
        to: u8,
        at: DateTime<Utc>,
        consume: bool,
    ) -> StoreResult<Option<TracepathSessionRecord>> {
        let mut state = self.state.lock();
        let Some(session) = state.tracepaths.get_mut(id) else {
            return Ok(None);
        };
        Ok(try_advance(session, from, to, at, consume).then(|| session.clone()))
    }

    fn invalidate_tracepath(&self, id: &str) -> StoreResult<()> {
        if let Some(s) = self.state.lock().tracepaths.get_mut(id) {
            s.valid = false;
        }
        Ok(())
    }

    fn put_token(&self, token: &RotatingTokenRecord) -> StoreResult<()> {
        self.state
            .lock()
            .tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    fn get_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RotatingTokenRecord>> {
        Ok(self
            .state
            .lock()
            .tokens
            .get(token)
            .filter(|t| now < t.expires_at)
            .cloned())
    }

    fn consume_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RotatingTokenRecord>> {
        let mut state = self.state.lock();
        Ok(state
            .tokens
            .get_mut(token)
            .filter(|t| t.is_live(now))
            .map(|t| {
                t.valid = false;
                t.clone()
            }))
    }

    fn put_delivery_session(&self, session: &DeliverySession) -> StoreResult<()> {
        self.state
            .lock()
            .deliveries
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    fn get_delivery_session(&self, token: &str) -> StoreResult<Option<DeliverySession>> {
        Ok(self.state.lock().deliveries.get(token).cloned())
    }

    fn update_delivery_status(
        &self,
        token: &str,
        status: ConnectionStatus,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        let session = state
            .deliveries
            .get_mut(token)
            .ok_or_else(|| StoreError::NotFound(format!("delivery session {token}")))?;
        session.status = status;
        session.status_reason = reason.map(str::to_string);
        Ok(())
    }

    fn touch_delivery_session(&self, token: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock();
        let session = state
            .deliveries
            .get_mut(token)
            .ok_or_else(|| StoreError::NotFound(format!("delivery session {token}")))?;
        session.last_heartbeat = at;
        Ok(())
    }

    fn prune_delivery_sessions(
        &self,
        ended_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let n = state.deliveries.len();
        state.deliveries.retain(|_, s| {
            let cutoff = if s.status.is_terminal() {
                ended_before
            } else {
                stale_before
            };
            s.last_heartbeat >= cutoff
        });
        Ok(n - state.deliveries.len())
    }

    fn get_layer(
        &self,
        script_id: &ScriptId,
        layer: u8,
        version: &str,
    ) -> StoreResult<Option<CachedLayer>> {
        Ok(self
            .state
            .lock()
            .layers
            .get(&(*script_id, layer, version.to_string()))
            .cloned())
    }

    fn put_layer(&self, layer: &CachedLayer) -> StoreResult<()> {
        self.state.lock().layers.insert(
            (layer.script_id, layer.layer, layer.version.clone()),
            layer.clone(),
        );
        Ok(())
    }

    fn increment_warnings(&self, key_id: &KeyId) -> StoreResult<u32> {
        let mut state = self.state.lock();
        let count = state.warnings.entry(*key_id).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn warnings(&self, key_id: &KeyId) -> StoreResult<u32> {
        Ok(self.state.lock().warnings.get(key_id).copied().unwrap_or(0))
    }

    fn reset_warnings(&self, key_id: &KeyId) -> StoreResult<()> {
        self.state.lock().warnings.remove(key_id);
        Ok(())
    }

    fn log_request(&self, entry: &RequestLogEntry) -> StoreResult<()> {
        self.state.lock().requests.push(entry.clone());
        Ok(())
    }

    fn count_requests_since(&self, key_id: &KeyId, since: DateTime<Utc>) -> StoreResult<u64> {
        let state = self.state.lock();
        Ok(state
            .requests
            .iter()
            .filter(|r| r.key_id.as_ref() == Some(key_id) && r.at >= since)
            .count() as u64)
    }

    fn distinct_ips_since(&self, key_id: &KeyId, since: DateTime<Utc>) -> StoreResult<u64> {
        let state = self.state.lock();
        let ips: HashSet<&str> = state
            .requests
            .iter()
            .filter(|r| r.key_id.as_ref() == Some(key_id) && r.at >= since)
            .map(|r| r.ip.as_str())
            .collect();
        Ok(ips.len() as u64)
    }

    fn prune_request_log(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let n = state.requests.len();
        state.requests.retain(|r| r.at >= before);
        Ok(n - state.requests.len())
    }

    fn append_event(&self, event: &SecurityEvent) -> StoreResult<()> {
        self.state.lock().events.push(event.clone());
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> StoreResult<Vec<SecurityEvent>> {
        Ok(self
            .state
            .lock()
            .events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn prune_events(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let n = state.events.len();
        state.events.retain(|e| e.at >= before);
        Ok(n - state.events.len())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        let mut state = self.state.lock();
        let mut report = SweepReport::default();

        let n = state.markers.len();
        state.markers.retain(|_, exp| *exp > now);
        report.markers = n - state.markers.len();

        let n = state.tokens.len();
        state.tokens.retain(|_, t| now < t.expires_at);
        report.tokens = n - state.tokens.len();

        let n = state.tracepaths.len();
        state.tracepaths.retain(|_, s| !s.is_expired(now));
        report.sessions = n - state.tracepaths.len();

        let n = state.blacklist.len();
        state.blacklist.retain(|e| e.is_active(now));
        report.blacklist = n - state.blacklist.len();

        Ok(report)
    }
}
