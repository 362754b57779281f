//! IP and hardware-id blacklist.

use crate::cache::DenyCache;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracegate_store::GateStore;
use tracegate_types::{BlacklistEntry, Clock, GateError, GateResult};
use tracing::{debug, info};

/// Upper bound on how long a cached ban is trusted before the store is
/// consulted again. Keeps an unban on another instance from being masked
/// for the lifetime of a permanent ban.
const CACHE_REFRESH_SECS: i64 = 60;

/// The first check on every protocol entry point.
pub struct Blacklist {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    cache: DenyCache<BlacklistEntry>,
}

impl Blacklist {
    pub fn new(store: Arc<dyn GateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cache: DenyCache::default(),
        }
    }

    /// Returns the active entry blocking `ip` or `hwid_hash`, if any.
    ///
    /// A store failure is returned as an error; callers must treat it as a
    /// denial.
    pub fn is_blacklisted(
        &self,
        ip: Option<&str>,
        hwid_hash: Option<&str>,
    ) -> GateResult<Option<BlacklistEntry>> {
        let now = self.clock.now();

        for key in cache_keys(ip, hwid_hash) {
            if let Some(entry) = self.cache.get(&key, now) {
                debug!(%key, "blacklist cache hit");
                return Ok(Some(entry));
            }
        }

        let Some(entry) = self.store.find_blacklist(ip, hwid_hash, now)? else {
            return Ok(None);
        };
        self.remember(&entry, now);
        Ok(Some(entry))
    }

    /// Fails with [`GateError::Banned`] if `ip` or `hwid_hash` is blocked.
    pub fn check(&self, ip: Option<&str>, hwid_hash: Option<&str>) -> GateResult<()> {
        match self.is_blacklisted(ip, hwid_hash)? {
            Some(entry) => Err(GateError::Banned {
                reason: entry.reason,
                expires_at: entry.expires_at,
            }),
            None => Ok(()),
        }
    }

    /// Bans `ip` and/or `hwid_hash`. `duration` of `None` is permanent.
    pub fn ban(
        &self,
        ip: Option<&str>,
        hwid_hash: Option<&str>,
        reason: &str,
        duration: Option<Duration>,
    ) -> GateResult<BlacklistEntry> {
        if ip.is_none() && hwid_hash.is_none() {
            return Err(GateError::InvalidRequest(
                "a ban needs an ip or a hardware id".into(),
            ));
        }
        let now = self.clock.now();
        let entry = BlacklistEntry {
            ip: ip.map(str::to_string),
            hwid_hash: hwid_hash.map(str::to_string),
            reason: reason.to_string(),
            banned_at: now,
            expires_at: duration.map(|d| now + d),
        };
        self.store.add_blacklist(&entry)?;
        self.remember(&entry, now);
        info!(ip = ?entry.ip, hwid = ?entry.hwid_hash, reason, expires_at = ?entry.expires_at, "blacklisted");
        Ok(entry)
    }

    /// Lifts every ban naming `ip` or `hwid_hash`. Returns the number of
    /// entries removed.
    pub fn unban(&self, ip: Option<&str>, hwid_hash: Option<&str>) -> GateResult<usize> {
        for key in cache_keys(ip, hwid_hash) {
            self.cache.remove(&key);
        }
        let removed = self.store.remove_blacklist(ip, hwid_hash)?;
        info!(?ip, hwid = ?hwid_hash, removed, "blacklist entries removed");
        Ok(removed)
    }

    /// Drops expired cache entries.
    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep(self.clock.now())
    }

    fn remember(&self, entry: &BlacklistEntry, now: DateTime<Utc>) {
        let refresh = now + Duration::seconds(CACHE_REFRESH_SECS);
        let until = entry.expires_at.map_or(refresh, |exp| exp.min(refresh));
        for key in cache_keys(entry.ip.as_deref(), entry.hwid_hash.as_deref()) {
            self.cache.insert(key, entry.clone(), until, now);
        }
    }
}

fn cache_keys(ip: Option<&str>, hwid_hash: Option<&str>) -> Vec<String> {
    let mut keys = Vec::with_capacity(2);
    if let Some(ip) = ip {
        keys.push(format!("ip:{ip}"));
    }
    if let Some(hwid) = hwid_hash {
        keys.push(format!("hwid:{hwid}"));
    }
    keys
}
