//! Security event recording.

use crate::notify::Notifier;
use std::sync::Arc;
use tracegate_store::GateStore;
use tracegate_types::{Clock, KeyId, SecurityEvent, SecurityEventKind};
use tracing::warn;

/// Appends security events to the store and forwards them to the
/// webhook. Recording never fails the request that triggered it.
#[derive(Clone)]
pub struct Audit {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
}

/// Who an event is about.
#[derive(Debug, Clone, Copy, Default)]
pub struct Subject<'a> {
    pub ip: Option<&'a str>,
    pub key_id: Option<KeyId>,
    pub hwid_hash: Option<&'a str>,
}

impl Audit {
    pub fn new(store: Arc<dyn GateStore>, clock: Arc<dyn Clock>, notifier: Notifier) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    pub fn record(
        &self,
        kind: SecurityEventKind,
        subject: Subject<'_>,
        threat_level: u8,
        detail: impl Into<String>,
    ) -> SecurityEvent {
        let event = SecurityEvent {
            kind,
            ip: subject.ip.map(str::to_string),
            key_id: subject.key_id,
            hwid_hash: subject.hwid_hash.map(str::to_string),
            threat_level: threat_level.min(100),
            detail: detail.into(),
            at: self.clock.now(),
        };
        if let Err(e) = self.store.append_event(&event) {
            warn!(%kind, "failed to persist security event: {e}");
        }
        self.notifier.notify(&event);
        event
    }
}
