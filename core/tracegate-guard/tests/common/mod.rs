#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracegate_store::{GateStore, MemoryStore};
use tracegate_types::ManualClock;

pub struct Fixture {
    pub store: Arc<dyn GateStore>,
    pub clock: ManualClock,
}

pub fn fixture() -> Fixture {
    Fixture {
        store: Arc::new(MemoryStore::new()),
        clock: ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()),
    }
}

impl Fixture {
    pub fn clock(&self) -> Arc<ManualClock> {
        Arc::new(self.clock.clone())
    }
}
