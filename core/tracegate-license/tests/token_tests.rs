mod common;

use common::fixture;
use proptest::prelude::*;
use tracegate_license::{LicenseError, TokenBinding, TokenIssuer, MAX_TOKEN_TTL_SECS, MIN_TOKEN_TTL_SECS};
use tracegate_types::{KeyId, ScriptId, TokenKind};

fn binding(script_id: ScriptId) -> TokenBinding<'static> {
    TokenBinding {
        script_id,
        hwid_hash: Some("hw"),
        ip: "10.0.0.1",
        key_id: None,
    }
}

// ── Issuance ─────────────────────────────────────────────────────

#[test]
fn ttl_is_clamped() {
    let f = fixture();
    let short = TokenIssuer::new(f.store.clone(), f.clock(), 1, 8);
    let long = TokenIssuer::new(f.store.clone(), f.clock(), 600, 8);
    assert_eq!(short.ttl().num_seconds(), MIN_TOKEN_TTL_SECS);
    assert_eq!(long.ttl().num_seconds(), MAX_TOKEN_TTL_SECS);
}

#[test]
fn issued_tokens_carry_binding() {
    let f = fixture();
    let issuer = TokenIssuer::new(f.store.clone(), f.clock(), 20, 8);
    let sid = ScriptId::new();
    let key = KeyId::new();
    let t = issuer
        .issue_session(TokenBinding {
            key_id: Some(key),
            ..binding(sid)
        })
        .unwrap();
    assert_eq!(t.kind, TokenKind::Session);
    assert_eq!(t.step, 0);
    assert_eq!(t.max_step, 8);
    assert_eq!(t.key_id, Some(key));
    assert_eq!(t.hwid_hash.as_deref(), Some("hw"));
    assert_eq!((t.expires_at - t.issued_at).num_seconds(), 20);
    assert_eq!(t.token.len(), 64);
}

// ── Consumption ──────────────────────────────────────────────────

#[test]
fn consume_is_single_use() {
    let f = fixture();
    let issuer = TokenIssuer::new(f.store.clone(), f.clock(), 20, 8);
    let sid = ScriptId::new();
    let t = issuer.issue_rotating(binding(sid)).unwrap();

    let consumed = issuer.consume(&t.token, &sid).unwrap();
    assert!(!consumed.valid);
    assert!(matches!(
        issuer.consume(&t.token, &sid),
        Err(LicenseError::TokenRejected)
    ));
}

#[test]
fn consumption_is_visible_to_other_instances() {
    let f = fixture();
    let a = TokenIssuer::new(f.store.clone(), f.clock(), 20, 8);
    let b = TokenIssuer::new(f.store.clone(), f.clock(), 20, 8);
    let sid = ScriptId::new();
    let t = a.issue_rotating(binding(sid)).unwrap();
    a.consume(&t.token, &sid).unwrap();
    assert!(b.consume(&t.token, &sid).is_err());
}

#[test]
fn expired_token_rejected() {
    let f = fixture();
    let issuer = TokenIssuer::new(f.store.clone(), f.clock(), 15, 8);
    let sid = ScriptId::new();
    let t = issuer.issue_rotating(binding(sid)).unwrap();
    f.clock.advance_secs(15);
    assert!(matches!(
        issuer.consume(&t.token, &sid),
        Err(LicenseError::TokenRejected)
    ));
}

#[test]
fn script_mismatch_rejected_and_burns_token() {
    let f = fixture();
    let issuer = TokenIssuer::new(f.store.clone(), f.clock(), 20, 8);
    let sid = ScriptId::new();
    let t = issuer.issue_rotating(binding(sid)).unwrap();
    assert!(matches!(
        issuer.consume(&t.token, &ScriptId::new()),
        Err(LicenseError::ScriptMismatch { .. })
    ));
    assert!(issuer.consume(&t.token, &sid).is_err());
}

// ── Rotation ─────────────────────────────────────────────────────

#[test]
fn rotate_invalidates_and_steps() {
    let f = fixture();
    let issuer = TokenIssuer::new(f.store.clone(), f.clock(), 20, 8);
    let sid = ScriptId::new();
    let t0 = issuer.issue_rotating(binding(sid)).unwrap();

    let t1 = issuer.rotate(&t0.token, &sid, Some("hw")).unwrap();
    assert_eq!(t1.step, 1);
    assert_ne!(t1.token, t0.token);
    assert_eq!(t1.ip, t0.ip);
    assert_eq!(t1.hwid_hash, t0.hwid_hash);
    assert_eq!(t1.kind, TokenKind::Rotating);

    assert!(issuer.rotate(&t0.token, &sid, Some("hw")).is_err());
    assert!(issuer.consume(&t0.token, &sid).is_err());
}

#[test]
fn rotate_checks_hwid_binding() {
    let f = fixture();
    let issuer = TokenIssuer::new(f.store.clone(), f.clock(), 20, 8);
    let sid = ScriptId::new();
    let t = issuer.issue_rotating(binding(sid)).unwrap();
    assert!(matches!(
        issuer.rotate(&t.token, &sid, Some("other")),
        Err(LicenseError::BindingMismatch("hwid"))
    ));
}

#[test]
fn runaway_rotation_stops_at_max_step() {
    let f = fixture();
    let issuer = TokenIssuer::new(f.store.clone(), f.clock(), 20, 3);
    let sid = ScriptId::new();
    let mut t = issuer.issue_rotating(binding(sid)).unwrap();
    for expected in 1..=3 {
        t = issuer.rotate(&t.token, &sid, Some("hw")).unwrap();
        assert_eq!(t.step, expected);
    }
    assert!(matches!(
        issuer.rotate(&t.token, &sid, Some("hw")),
        Err(LicenseError::StepLimitExceeded { step: 4, max_step: 3 })
    ));
}

proptest! {
    #[test]
    fn rotation_chain_always_steps_by_one(rotations in 1u32..12) {
        let f = fixture();
        let issuer = TokenIssuer::new(f.store.clone(), f.clock(), 20, 16);
        let sid = ScriptId::new();
        let mut t = issuer.issue_rotating(binding(sid)).unwrap();
        for _ in 0..rotations {
            let next = issuer.rotate(&t.token, &sid, Some("hw")).unwrap();
            prop_assert_eq!(next.step, t.step + 1);
            prop_assert!(issuer.consume(&t.token, &sid).is_err());
            t = next;
        }
    }
}
