use chrono::{Duration, Utc};
use tracegate_types::{
    BlacklistEntry, Clock, ConnectionStatus, GateError, LicenseKeyRecord, ManualClock,
    RateWindow, ScriptId,
};

// ── LicenseKeyRecord ─────────────────────────────────────────────

#[test]
fn new_key_is_unlocked_and_usable() {
    let key = LicenseKeyRecord::new(ScriptId::new(), "KEY-1");
    let now = Utc::now();
    assert!(key.hwid_hash.is_none());
    assert_eq!(key.hwid_reset_count, 0);
    assert!(!key.is_expired(now));
    assert!(!key.ban_active(now));
}

#[test]
fn key_expiry_boundary() {
    let now = Utc::now();
    let mut key = LicenseKeyRecord::new(ScriptId::new(), "KEY-2");
    key.expires_at = Some(now);
    assert!(key.is_expired(now));
    assert!(!key.is_expired(now - Duration::seconds(1)));
}

#[test]
fn temporary_ban_lapses() {
    let now = Utc::now();
    let mut key = LicenseKeyRecord::new(ScriptId::new(), "KEY-3");
    key.banned = true;
    key.ban_expires_at = Some(now + Duration::hours(1));
    assert!(key.ban_active(now));
    assert!(!key.ban_active(now + Duration::hours(2)));
}

#[test]
fn permanent_ban_never_lapses() {
    let now = Utc::now();
    let mut key = LicenseKeyRecord::new(ScriptId::new(), "KEY-4");
    key.banned = true;
    assert!(key.ban_active(now + Duration::days(3650)));
}

// ── BlacklistEntry ───────────────────────────────────────────────

fn entry(ip: Option<&str>, hwid: Option<&str>) -> BlacklistEntry {
    BlacklistEntry {
        ip: ip.map(String::from),
        hwid_hash: hwid.map(String::from),
        reason: "test".into(),
        banned_at: Utc::now(),
        expires_at: None,
    }
}

#[test]
fn blacklist_matches_either_identifier() {
    let e = entry(Some("10.0.0.1"), Some("abc"));
    assert!(e.matches(Some("10.0.0.1"), None));
    assert!(e.matches(None, Some("abc")));
    assert!(e.matches(Some("10.0.0.2"), Some("abc")));
    assert!(!e.matches(Some("10.0.0.2"), Some("def")));
    assert!(!e.matches(None, None));
}

#[test]
fn blacklist_ip_only_entry_ignores_hwid() {
    let e = entry(Some("10.0.0.1"), None);
    assert!(!e.matches(None, Some("anything")));
}

#[test]
fn blacklist_expiry() {
    let now = Utc::now();
    let mut e = entry(Some("1.1.1.1"), None);
    assert!(e.is_active(now));
    e.expires_at = Some(now);
    assert!(!e.is_active(now));
}

// ── RateWindow / ConnectionStatus ────────────────────────────────

#[test]
fn rate_window_block() {
    let now = Utc::now();
    let mut w = RateWindow::starting(now);
    assert!(!w.is_blocked(now));
    w.blocked_until = Some(now + Duration::seconds(10));
    assert!(w.is_blocked(now));
    assert!(!w.is_blocked(now + Duration::seconds(10)));
}

#[test]
fn connection_status_terminal() {
    assert!(!ConnectionStatus::Active.is_terminal());
    assert!(ConnectionStatus::Kicked.is_terminal());
    assert!(ConnectionStatus::Banned.is_terminal());
    assert!(ConnectionStatus::Disconnected.is_terminal());
    assert_eq!(
        serde_json::to_string(&ConnectionStatus::Kicked).unwrap(),
        "\"kicked\""
    );
}

// ── Clock ────────────────────────────────────────────────────────

#[test]
fn manual_clock_advances_shared() {
    let clock = ManualClock::starting_now();
    let other = clock.clone();
    let before = clock.now();
    other.advance_secs(30);
    assert_eq!(clock.now() - before, Duration::seconds(30));
}

// ── GateError ────────────────────────────────────────────────────

#[test]
fn client_messages_do_not_leak_detail() {
    let err = GateError::UpstreamUnavailable("sqlite: disk I/O error at page 7".into());
    assert_eq!(err.client_message(), "Service temporarily unavailable");
    let err = GateError::SequenceViolation("expected step 2, got 4".into());
    assert_eq!(err.client_message(), "Invalid tracepath sequence");
    assert_eq!(GateError::session_expired().client_message(), "Session expired");
}

#[test]
fn security_relevance() {
    assert!(GateError::ReplayDetected.is_security_relevant());
    assert!(GateError::Unauthorized("x".into()).is_security_relevant());
    assert!(!GateError::RateLimited { retry_after_secs: 1 }.is_security_relevant());
    assert!(!GateError::UpstreamUnavailable("x".into()).is_security_relevant());
}
