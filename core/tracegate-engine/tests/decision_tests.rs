mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{ctx, env, IP};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use tracegate_engine::{
    Audit, ClientReport, DecisionConfig, DecisionEngine, DecisionOutcome, Notifier, RequestContext,
};
use tracegate_guard::Blacklist;
use tracegate_license::KeyChecks;
use tracegate_store::{GateStore, MemoryStore};
use tracegate_types::{
    Clock, GateError, LicenseKeyRecord, ManualClock, RequestLogEntry, ScriptId, SecurityEventKind,
};

struct Fixture {
    engine: DecisionEngine,
    store: Arc<dyn GateStore>,
    clock: ManualClock,
    blacklist: Arc<Blacklist>,
    key: LicenseKeyRecord,
}

fn fixture(config: DecisionConfig) -> Fixture {
    let store: Arc<dyn GateStore> = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap());
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let key = LicenseKeyRecord::new(ScriptId::new(), "TG-DECIDE");
    store.put_key(&key).unwrap();

    let keys = Arc::new(KeyChecks::new(store.clone(), shared.clone(), 2));
    let blacklist = Arc::new(Blacklist::new(store.clone(), shared.clone()));
    let audit = Audit::new(store.clone(), shared.clone(), Notifier::disabled());
    let engine = DecisionEngine::new(
        store.clone(),
        shared,
        keys,
        blacklist.clone(),
        audit,
        config,
    );
    Fixture {
        engine,
        store,
        clock,
        blacklist,
        key,
    }
}

fn decision_config() -> DecisionConfig {
    DecisionConfig {
        known_bad_executors: vec!["BadExec".into()],
        ..Default::default()
    }
}

fn tools(names: &[&str]) -> ClientReport {
    ClientReport {
        detected_tools: names.iter().map(|s| s.to_string()).collect(),
        executor: None,
    }
}

impl Fixture {
    fn log_requests(&self, count: usize, ip: &str) {
        for _ in 0..count {
            self.store
                .log_request(&RequestLogEntry {
                    key_id: Some(self.key.id),
                    ip: ip.to_string(),
                    endpoint: "validate".into(),
                    at: self.clock.now(),
                })
                .unwrap();
        }
    }

    fn key(&self) -> LicenseKeyRecord {
        self.store.get_key_by_id(&self.key.id).unwrap().unwrap()
    }
}

// ── Scoring ──────────────────────────────────────────────────────

#[test]
fn quiet_request_is_allowed() {
    let f = fixture(decision_config());
    let d = f.engine.evaluate(&ctx(), &f.key, None, &ClientReport::default()).unwrap();
    assert_eq!(d.outcome, DecisionOutcome::None);
    assert_eq!(d.threat_level, 0);
    assert!(d.warning_message().is_none());
    assert_eq!(f.store.warnings(&f.key.id).unwrap(), 0);
}

#[test]
fn client_reports_alone_never_ban() {
    let f = fixture(decision_config());
    let report = ClientReport {
        detected_tools: vec!["dex".into(), "spy".into(), "hook".into(), "dump".into()],
        executor: Some("BadExec".into()),
    };
    for _ in 0..10 {
        let d = f.engine.evaluate(&ctx(), &f.key, Some("victim-hw"), &report).unwrap();
        assert_eq!(d.outcome, DecisionOutcome::Warning);
        assert!(d.threat_level <= 30);
        assert_eq!(d.warnings, 0);
        assert_eq!(d.warning_message().as_deref(), Some("Suspicious activity detected"));
    }
    assert!(!f.key().banned);
    assert_eq!(f.store.warnings(&f.key.id).unwrap(), 0);
    assert!(f.blacklist.is_blacklisted(None, Some("victim-hw")).unwrap().is_none());

    // still audited
    let events = f.store.recent_events(20).unwrap();
    assert_eq!(
        events.iter().filter(|e| e.kind == SecurityEventKind::Warning).count(),
        10
    );
}

#[test]
fn blank_tool_names_are_ignored() {
    let f = fixture(decision_config());
    let d = f.engine.evaluate(&ctx(), &f.key, None, &tools(&["", "  "])).unwrap();
    assert_eq!(d.outcome, DecisionOutcome::None);
}

#[test]
fn trusted_bad_executor_bans() {
    let f = fixture(decision_config());
    let ctx = RequestContext::new(IP).with_executor("badexec");
    let d = f.engine.evaluate(&ctx, &f.key, Some("hw"), &ClientReport::default()).unwrap();
    assert_eq!(d.outcome, DecisionOutcome::TempBan);
    assert_eq!(d.threat_level, 70);
    assert_eq!(
        d.ban_expires_at,
        Some(f.clock.now() + Duration::seconds(3600))
    );

    let key = f.key();
    assert!(key.banned);
    assert!(f.blacklist.is_blacklisted(None, Some("hw")).unwrap().is_some());
}

#[test]
fn corroborated_reports_raise_the_score() {
    let f = fixture(decision_config());
    f.log_requests(120, IP);
    let d = f.engine.evaluate(&ctx(), &f.key, None, &ClientReport::default()).unwrap();
    assert_eq!(d.outcome, DecisionOutcome::None);
    assert_eq!(d.threat_level, 25);

    let d = f
        .engine
        .evaluate(&ctx(), &f.key, None, &tools(&["dex", "spy", "hook"]))
        .unwrap();
    assert_eq!(d.threat_level, 55);
    assert_eq!(d.outcome, DecisionOutcome::Warning);

    f.log_requests(120, IP);
    let d = f
        .engine
        .evaluate(&ctx(), &f.key, None, &tools(&["dex", "spy", "hook"]))
        .unwrap();
    assert_eq!(d.threat_level, 80);
    assert_eq!(d.outcome, DecisionOutcome::TempBan);
}

#[test]
fn many_addresses_and_bad_executor_perm_ban() {
    let f = fixture(decision_config());
    for i in 0..6 {
        f.log_requests(1, &format!("198.51.100.{i}"));
    }
    let ctx = RequestContext::new(IP).with_executor("BadExec");
    let d = f.engine.evaluate(&ctx, &f.key, None, &ClientReport::default()).unwrap();
    assert_eq!(d.threat_level, 100);
    assert_eq!(d.outcome, DecisionOutcome::PermBan);
    assert_eq!(d.ban_expires_at, None);
    assert!(d.reasons.iter().any(|r| r.contains("distinct addresses")));
}

#[test]
fn old_requests_fall_out_of_the_window() {
    let f = fixture(decision_config());
    f.log_requests(240, IP);
    f.clock.advance_secs(3601);
    let d = f.engine.evaluate(&ctx(), &f.key, None, &ClientReport::default()).unwrap();
    assert_eq!(d.outcome, DecisionOutcome::None);
}

#[test]
fn banned_key_is_reported_as_already_banned() {
    let f = fixture(decision_config());
    let mut key = f.key();
    key.banned = true;
    key.ban_reason = Some("manual".into());
    f.store.put_key(&key).unwrap();

    let d = f.engine.evaluate(&ctx(), &key, None, &ClientReport::default()).unwrap();
    assert_eq!(d.outcome, DecisionOutcome::AlreadyBanned);
    assert_eq!(d.ban_reason.as_deref(), Some("manual"));
}

// ── Warnings ─────────────────────────────────────────────────────

#[test]
fn third_warning_escalates_to_permanent_ban() {
    let f = fixture(decision_config());
    f.log_requests(120, IP);
    let report = tools(&["dex"]);

    for expected in 1..=2 {
        let d = f.engine.evaluate(&ctx(), &f.key, Some("hw"), &report).unwrap();
        assert_eq!(d.outcome, DecisionOutcome::Warning);
        assert_eq!(d.threat_level, 35);
        assert_eq!(d.warnings, expected);
        assert!(d.warning_message().unwrap().contains(&expected.to_string()));
    }

    let d = f.engine.evaluate(&ctx(), &f.key, Some("hw"), &report).unwrap();
    assert_eq!(d.outcome, DecisionOutcome::PermBan);
    assert_eq!(d.ban_reason.as_deref(), Some("Exceeded maximum warnings (3/3)"));

    let key = f.key();
    assert!(key.banned);
    assert_eq!(key.ban_reason.as_deref(), Some("Exceeded maximum warnings (3/3)"));
    assert_eq!(key.ban_expires_at, None);
    assert_eq!(f.store.warnings(&f.key.id).unwrap(), 0);
    assert!(f.blacklist.is_blacklisted(None, Some("hw")).unwrap().is_some());

    let events = f.store.recent_events(10).unwrap();
    assert_eq!(events[0].kind, SecurityEventKind::PermBan);
    assert_eq!(
        events.iter().filter(|e| e.kind == SecurityEventKind::Warning).count(),
        2
    );
}

#[test]
fn escalation_can_be_temporary() {
    let f = fixture(DecisionConfig {
        max_warnings: 1,
        escalation_ban_secs: Some(600),
        ..decision_config()
    });
    f.log_requests(120, IP);
    let d = f.engine.evaluate(&ctx(), &f.key, None, &tools(&["dex"])).unwrap();
    assert_eq!(d.outcome, DecisionOutcome::TempBan);
    assert_eq!(d.ban_reason.as_deref(), Some("Exceeded maximum warnings (1/1)"));
    assert_eq!(d.ban_expires_at, Some(f.clock.now() + Duration::seconds(600)));
}

#[test]
fn warnings_escalate_through_validation() {
    let e = env();
    e.log_volume(120);
    let mut req = e.validate_req(None);
    req.report = tools(&["dex"]);

    for n in 1..=2 {
        let mut req = req.clone();
        req.nonce = e.validate_req(None).nonce;
        let resp = e.gate.validate(&ctx(), &req).unwrap();
        assert!(resp.warning.unwrap().contains(&n.to_string()));
    }

    match e.gate.validate(&ctx(), &req).unwrap_err() {
        GateError::Banned { reason, expires_at } => {
            assert_eq!(reason, "Exceeded maximum warnings (3/3)");
            assert_eq!(expires_at, None);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(e.store.get_key_by_id(&e.key.id).unwrap().unwrap().banned);
}

#[test]
fn reported_tools_through_validation_never_ban() {
    let e = env();
    for _ in 0..5 {
        let mut req = e.validate_req(Some("victim-hwid"));
        req.report = tools(&["dex"]);
        let resp = e.gate.validate(&ctx(), &req).unwrap();
        assert!(resp.warning.is_some());
    }
    assert!(!e.store.get_key_by_id(&e.key.id).unwrap().unwrap().banned);
    let hwid = e.hwid_hash("victim-hwid");
    assert!(e.store.find_blacklist(None, Some(&hwid), e.clock.now()).unwrap().is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn uncorroborated_reports_never_ban(
        tools in proptest::collection::vec("[a-z ]{0,8}", 0..12),
        executor in proptest::option::of(prop_oneof![Just("BadExec".to_string()), "[A-Za-z]{1,8}"]),
        rounds in 1usize..6,
    ) {
        let f = fixture(decision_config());
        let report = ClientReport { detected_tools: tools, executor };
        for _ in 0..rounds {
            let d = f.engine.evaluate(&ctx(), &f.key, Some("hw"), &report).unwrap();
            prop_assert!(!d.outcome.is_ban());
            prop_assert!(d.threat_level <= 30);
        }
        prop_assert!(!f.key().banned);
        prop_assert_eq!(f.store.warnings(&f.key.id).unwrap(), 0);
        prop_assert!(f.blacklist.is_blacklisted(None, Some("hw")).unwrap().is_none());
    }
}
