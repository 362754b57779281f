//! Shared test helpers for license tests.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracegate_store::{GateStore, MemoryStore};
use tracegate_types::{LicenseKeyRecord, ManualClock, ScriptId, ScriptRecord};

pub const SECRET: &[u8] = b"test-signing-secret-0123456789abcdef";

pub struct Fixture {
    pub store: Arc<dyn GateStore>,
    pub clock: ManualClock,
}

pub fn fixture() -> Fixture {
    Fixture {
        store: Arc::new(MemoryStore::new()),
        clock: ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()),
    }
}

impl Fixture {
    pub fn clock(&self) -> Arc<ManualClock> {
        Arc::new(self.clock.clone())
    }

    /// Stores a script and an unlocked key for it.
    pub fn script_with_key(&self, value: &str) -> (ScriptId, LicenseKeyRecord) {
        let script = ScriptRecord::new("demo", "print('hello')");
        self.store.put_script(&script).unwrap();
        let key = LicenseKeyRecord::new(script.id, value);
        self.store.put_key(&key).unwrap();
        (script.id, key)
    }
}
