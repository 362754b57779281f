//! Shared helpers for engine tests.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracegate_crypto::{generate_token, hmac_sign_hex};
use tracegate_engine::messages::{HandshakeRequest, StepRequest, ValidateRequest};
use tracegate_engine::{Gate, GateConfig, RequestContext};
use tracegate_store::{GateStore, MemoryStore};
use tracegate_types::{Clock, LicenseKeyRecord, ManualClock, RequestLogEntry, ScriptRecord};

pub const IP: &str = "203.0.113.7";
pub const KEY: &str = "TG-KEY-0001";
pub const SOURCE: &str = "print('protected payload')";

pub fn config() -> GateConfig {
    GateConfig {
        signing_secret: "test-signing-secret-0123456789".into(),
        hwid_salt: "test-hwid-salt".into(),
        ..Default::default()
    }
}

pub struct TestEnv {
    pub gate: Gate,
    pub store: Arc<dyn GateStore>,
    pub clock: ManualClock,
    pub script: ScriptRecord,
    pub key: LicenseKeyRecord,
}

pub fn env() -> TestEnv {
    env_with(config())
}

pub fn env_with(config: GateConfig) -> TestEnv {
    let store: Arc<dyn GateStore> = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap());
    let script = ScriptRecord::new("demo", SOURCE);
    store.put_script(&script).unwrap();
    let key = LicenseKeyRecord::new(script.id, KEY);
    store.put_key(&key).unwrap();

    let gate = Gate::new(config, store.clone(), Arc::new(clock.clone())).unwrap();
    TestEnv {
        gate,
        store,
        clock,
        script,
        key,
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new(IP)
}

impl TestEnv {
    pub fn handshake_req(&self, hwid: Option<&str>) -> HandshakeRequest {
        HandshakeRequest {
            key: KEY.into(),
            script_id: self.script.id.to_string(),
            hwid: hwid.map(str::to_string),
        }
    }

    /// A minimal validation request with a fresh nonce.
    pub fn validate_req(&self, hwid: Option<&str>) -> ValidateRequest {
        ValidateRequest {
            key: KEY.into(),
            script_id: self.script.id.to_string(),
            hwid: hwid.map(str::to_string),
            nonce: Some(generate_token(12)),
            timestamp: Some(self.clock.unix_secs()),
            ..Default::default()
        }
    }

    /// Logs `count` validations of the test key at the current time.
    pub fn log_volume(&self, count: usize) {
        for _ in 0..count {
            self.store
                .log_request(&RequestLogEntry {
                    key_id: Some(self.key.id),
                    ip: IP.to_string(),
                    endpoint: "validate".into(),
                    at: self.clock.now(),
                })
                .unwrap();
        }
    }

    /// The salted hash the gate stores for `hwid`.
    pub fn hwid_hash(&self, hwid: &str) -> String {
        self.gate.hash_hwid(hwid).unwrap()
    }

    /// Adds a valid client signature to `req`.
    pub fn sign(&self, req: &mut ValidateRequest) {
        let ts = self.clock.unix_secs();
        let nonce = req.nonce.clone().unwrap_or_else(|| generate_token(12));
        let data = format!(
            "{}:{}:{}:{}",
            req.script_id,
            req.hwid.as_deref().unwrap_or(""),
            nonce,
            ts
        );
        req.signature = Some(hmac_sign_hex(data.as_bytes(), req.key.as_bytes()).unwrap());
        req.nonce = Some(nonce);
        req.timestamp = Some(ts);
    }

    /// Runs handshake and the three tracepath steps. Returns the
    /// session id and the rotating token for validation.
    pub fn walk_tracepath(&self, hwid: Option<&str>) -> (String, String) {
        let ctx = ctx();
        let hs = self.gate.handshake(&ctx, &self.handshake_req(hwid)).unwrap();
        let mut step = StepRequest {
            session_id: hs.tracepath_session.clone(),
            hwid: hwid.map(str::to_string),
            token: Some(hs.token),
        };
        let info = self.gate.tracepath_info(&ctx, &step).unwrap();
        step.token = info.ack.token;
        let endpoints = self.gate.tracepath_endpoints(&ctx, &step).unwrap();
        step.token = endpoints.ack.token;
        let flags = self.gate.tracepath_flags(&ctx, &step).unwrap();
        (hs.tracepath_session, flags.ack.token.unwrap())
    }
}
