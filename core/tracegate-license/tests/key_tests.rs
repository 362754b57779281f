mod common;

use chrono::Duration;
use common::fixture;
use tracegate_license::{HwidHasher, KeyChecks, LicenseError, DEFAULT_MAX_HWID_RESETS};
use tracegate_types::{GateError, ScriptId};

fn checks(f: &common::Fixture) -> KeyChecks {
    KeyChecks::new(f.store.clone(), f.clock(), DEFAULT_MAX_HWID_RESETS)
}

// ── Lookup and basic checks ──────────────────────────────────────

#[test]
fn unknown_key_rejected() {
    let f = fixture();
    let (sid, _) = f.script_with_key("KEY-1");
    let err = checks(&f).verify("KEY-404", &sid, None).unwrap_err();
    assert_eq!(
        GateError::from(err),
        GateError::InvalidCredential("Invalid key".into())
    );
}

#[test]
fn key_value_is_trimmed() {
    let f = fixture();
    let (sid, key) = f.script_with_key("KEY-1");
    let found = checks(&f).verify("  KEY-1\n", &sid, None).unwrap();
    assert_eq!(found.id, key.id);
}

#[test]
fn script_mismatch_rejected() {
    let f = fixture();
    f.script_with_key("KEY-1");
    assert!(matches!(
        checks(&f).verify("KEY-1", &ScriptId::new(), None),
        Err(LicenseError::ScriptMismatch { .. })
    ));
}

#[test]
fn expired_key_rejected() {
    let f = fixture();
    let (sid, mut key) = f.script_with_key("KEY-1");
    key.expires_at = Some(tracegate_types::Clock::now(&f.clock) + Duration::hours(1));
    f.store.put_key(&key).unwrap();

    let c = checks(&f);
    assert!(c.verify("KEY-1", &sid, None).is_ok());
    f.clock.advance(Duration::hours(1));
    assert!(matches!(
        c.verify("KEY-1", &sid, None),
        Err(LicenseError::Expired("Key"))
    ));
}

// ── Bans ─────────────────────────────────────────────────────────

#[test]
fn permanent_ban() {
    let f = fixture();
    let (sid, key) = f.script_with_key("KEY-1");
    let c = checks(&f);
    c.ban(&key.id, "chargeback", None).unwrap();

    f.clock.advance(Duration::days(365));
    match c.verify("KEY-1", &sid, None).unwrap_err() {
        LicenseError::KeyBanned { reason, expires_at } => {
            assert_eq!(reason, "chargeback");
            assert_eq!(expires_at, None);
        }
        other => panic!("unexpected {other:?}"),
    }

    c.unban(&key.id).unwrap();
    assert!(c.verify("KEY-1", &sid, None).is_ok());
}

#[test]
fn temporary_ban_lapses() {
    let f = fixture();
    let (sid, key) = f.script_with_key("KEY-1");
    let c = checks(&f);
    c.ban(&key.id, "abuse", Some(Duration::minutes(10))).unwrap();
    assert!(matches!(
        GateError::from(c.verify("KEY-1", &sid, None).unwrap_err()),
        GateError::Banned { .. }
    ));

    f.clock.advance(Duration::minutes(10));
    assert!(c.verify("KEY-1", &sid, None).is_ok());
    let stored = f.store.get_key_by_id(&key.id).unwrap().unwrap();
    assert!(!stored.banned);
    assert_eq!(stored.ban_reason, None);
}

// ── HWID locking ─────────────────────────────────────────────────

#[test]
fn third_device_is_rejected() {
    let f = fixture();
    let (sid, key) = f.script_with_key("KEY-1");
    let c = checks(&f);
    let hasher = HwidHasher::new("salt");
    let a = hasher.hash("HWID-A").unwrap();
    let b = hasher.hash("HWID-B").unwrap();
    let z = hasher.hash("HWID-C").unwrap();

    let first = c.verify("KEY-1", &sid, Some(&a)).unwrap();
    assert_eq!(first.hwid_hash.as_deref(), Some(a.as_str()));
    assert_eq!(first.hwid_reset_count, 1);

    // same device again does not count
    assert_eq!(c.verify("KEY-1", &sid, Some(&a)).unwrap().hwid_reset_count, 1);

    let second = c.verify("KEY-1", &sid, Some(&b)).unwrap();
    assert_eq!(second.hwid_hash.as_deref(), Some(b.as_str()));
    assert_eq!(second.hwid_reset_count, 2);

    let err = c.verify("KEY-1", &sid, Some(&z)).unwrap_err();
    assert!(matches!(err, LicenseError::HwidMismatch { resets: 2, max: 2 }));
    assert_eq!(
        GateError::from(err),
        GateError::InvalidCredential("HWID mismatch".into())
    );

    let stored = f.store.get_key_by_id(&key.id).unwrap().unwrap();
    assert_eq!(stored.hwid_hash.as_deref(), Some(b.as_str()));
}

#[test]
fn locked_key_requires_hwid() {
    let f = fixture();
    let (sid, _) = f.script_with_key("KEY-1");
    let c = checks(&f);
    c.verify("KEY-1", &sid, Some("hash-a")).unwrap();
    assert!(matches!(
        c.verify("KEY-1", &sid, None),
        Err(LicenseError::HwidMismatch { .. })
    ));
}

#[test]
fn unlocked_key_without_hwid_stays_unlocked() {
    let f = fixture();
    let (sid, _) = f.script_with_key("KEY-1");
    let key = checks(&f).verify("KEY-1", &sid, None).unwrap();
    assert_eq!(key.hwid_hash, None);
    assert_eq!(key.hwid_reset_count, 0);
}

#[test]
fn operator_reset_allows_rebinding() {
    let f = fixture();
    let (sid, key) = f.script_with_key("KEY-1");
    let c = checks(&f);
    c.verify("KEY-1", &sid, Some("a")).unwrap();
    c.verify("KEY-1", &sid, Some("b")).unwrap();
    assert!(c.verify("KEY-1", &sid, Some("c")).is_err());

    let reset = c.reset_hwid(&key.id).unwrap();
    assert_eq!(reset.hwid_hash, None);
    assert_eq!(reset.hwid_reset_count, 0);
    assert_eq!(
        c.verify("KEY-1", &sid, Some("c")).unwrap().hwid_hash.as_deref(),
        Some("c")
    );
}

#[test]
fn record_use_updates_counters() {
    let f = fixture();
    let (sid, _) = f.script_with_key("KEY-1");
    let c = checks(&f);
    let key = c.verify("KEY-1", &sid, None).unwrap();
    c.record_use(&key, "9.9.9.9").unwrap();
    let returned = c.record_use(&key, "9.9.9.9").unwrap();

    let stored = c.find("KEY-1").unwrap();
    assert_eq!(stored, returned);
    assert_eq!(stored.use_count, 2);
    assert_eq!(stored.last_ip.as_deref(), Some("9.9.9.9"));
    assert!(stored.last_used_at.is_some());
}

// ── Concurrent changes ───────────────────────────────────────────

#[test]
fn ban_between_verify_and_use_survives() {
    let f = fixture();
    let (sid, _) = f.script_with_key("KEY-1");
    let c = checks(&f);
    let seen = c.verify("KEY-1", &sid, None).unwrap();
    c.ban(&seen.id, "revoked", None).unwrap();
    c.record_use(&seen, "9.9.9.9").unwrap();

    let stored = c.find("KEY-1").unwrap();
    assert!(stored.banned);
    assert_eq!(stored.ban_reason.as_deref(), Some("revoked"));
    assert_eq!(stored.use_count, 1);
}

#[test]
fn stale_bind_does_not_override_a_reset() {
    let f = fixture();
    let (sid, key) = f.script_with_key("KEY-1");
    let c = checks(&f);
    c.verify("KEY-1", &sid, Some("a")).unwrap();
    let seen = c.find("KEY-1").unwrap();
    c.reset_hwid(&key.id).unwrap();

    // a bind computed from the pre-reset record loses the race
    assert_eq!(
        f.store
            .bind_key_hwid(&key.id, seen.hwid_hash.as_deref(), seen.hwid_reset_count, "b")
            .unwrap(),
        None
    );
    let stored = c.find("KEY-1").unwrap();
    assert_eq!(stored.hwid_hash, None);
    assert_eq!(stored.hwid_reset_count, 0);

    // a fresh verify binds against the current record
    let bound = c.verify("KEY-1", &sid, Some("b")).unwrap();
    assert_eq!(bound.hwid_hash.as_deref(), Some("b"));
    assert_eq!(bound.hwid_reset_count, 1);
}

#[test]
fn lapsed_ban_is_cleared_without_losing_usage() {
    let f = fixture();
    let (sid, key) = f.script_with_key("KEY-1");
    let c = checks(&f);
    c.record_use(&key, "1.1.1.1").unwrap();
    c.ban(&key.id, "cooldown", Some(Duration::seconds(60))).unwrap();
    f.clock.advance_secs(61);

    let verified = c.verify("KEY-1", &sid, None).unwrap();
    assert!(!verified.banned);
    assert_eq!(verified.use_count, 1);
    assert!(!c.find("KEY-1").unwrap().banned);
}

// ── Hardware id hashing ──────────────────────────────────────────

#[test]
fn hwid_hash_is_salted_and_trimmed() {
    let a = HwidHasher::new("salt-a");
    let b = HwidHasher::new("salt-b");
    assert_eq!(a.hash("HWID").unwrap(), a.hash("  HWID ").unwrap());
    assert_ne!(a.hash("HWID").unwrap(), b.hash("HWID").unwrap());
    assert_ne!(a.hash("HWID").unwrap(), "HWID");
}

#[test]
fn hwid_rejects_empty_and_oversized() {
    let h = HwidHasher::new("salt");
    assert!(matches!(h.hash("   "), Err(LicenseError::InvalidHwid(_))));
    let long = "x".repeat(tracegate_license::MAX_HWID_LEN + 1);
    assert!(matches!(h.hash(&long), Err(LicenseError::InvalidHwid(_))));
    assert_eq!(h.hash_optional(None).unwrap(), None);
}
