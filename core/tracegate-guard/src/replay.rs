//! Single-use nonces and request hashes.

use crate::cache::DenyCache;
use chrono::Duration;
use std::sync::Arc;
use tracegate_crypto::sha256_hex;
use tracegate_store::{GateStore, NONCE_NAMESPACE, REQUEST_HASH_NAMESPACE};
use tracegate_types::{Clock, GateError, GateResult};
use tracing::warn;

/// Rejects any nonce or request hash seen within its TTL.
pub struct ReplayGuard {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    seen: DenyCache<()>,
}

impl ReplayGuard {
    /// Markers are kept for `ttl`. Callers must reject requests older
    /// than half of `ttl` so a replay cannot outlive its marker.
    pub fn new(store: Arc<dyn GateStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            seen: DenyCache::default(),
        }
    }

    pub fn is_nonce_used(&self, nonce: &str) -> GateResult<bool> {
        self.is_used(NONCE_NAMESPACE, nonce)
    }

    /// Marks `nonce` consumed. Returns false if it already was.
    pub fn mark_nonce_used(&self, nonce: &str) -> GateResult<bool> {
        self.mark(NONCE_NAMESPACE, nonce)
    }

    pub fn is_request_hash_used(&self, hash: &str) -> GateResult<bool> {
        self.is_used(REQUEST_HASH_NAMESPACE, hash)
    }

    /// Marks `hash` consumed. Returns false if it already was.
    pub fn mark_request_hash_used(&self, hash: &str) -> GateResult<bool> {
        self.mark(REQUEST_HASH_NAMESPACE, hash)
    }

    /// Consumes both the nonce and the request hash, failing with
    /// [`GateError::ReplayDetected`] if either was already used.
    pub fn consume(&self, nonce: &str, request_hash: &str) -> GateResult<()> {
        if nonce.trim().is_empty() {
            return Err(GateError::InvalidRequest("nonce is required".into()));
        }
        if !self.mark_nonce_used(nonce)? {
            warn!(nonce, "replayed nonce");
            return Err(GateError::ReplayDetected);
        }
        if !self.mark_request_hash_used(request_hash)? {
            warn!(request_hash, "replayed request hash");
            return Err(GateError::ReplayDetected);
        }
        Ok(())
    }

    /// Drops expired cache entries.
    pub fn sweep_cache(&self) -> usize {
        self.seen.sweep(self.clock.now())
    }

    fn is_used(&self, namespace: &str, value: &str) -> GateResult<bool> {
        let now = self.clock.now();
        if self.seen.get(&cache_key(namespace, value), now).is_some() {
            return Ok(true);
        }
        Ok(self.store.is_marked(namespace, value, now)?)
    }

    fn mark(&self, namespace: &str, value: &str) -> GateResult<bool> {
        let now = self.clock.now();
        let key = cache_key(namespace, value);
        if self.seen.get(&key, now).is_some() {
            return Ok(false);
        }
        let expires_at = now + self.ttl;
        let fresh = self.store.mark_once(namespace, value, expires_at, now)?;
        self.seen.insert(key, (), expires_at, now);
        Ok(fresh)
    }
}

/// Hashes the identifying parts of a request into a replay marker.
#[must_use]
pub fn request_hash(parts: &[&str]) -> String {
    sha256_hex(parts.join("|").as_bytes())
}

fn cache_key(namespace: &str, value: &str) -> String {
    format!("{namespace}:{value}")
}
