mod common;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;
use common::SECRET;
use tracegate_license::{HandshakeSigner, LicenseError, HANDSHAKE_TOKEN_TTL_SECS};
use tracegate_types::{Clock, GateError, ScriptId};

fn now() -> chrono::DateTime<chrono::Utc> {
    common::fixture().clock.now()
}

#[test]
fn issue_and_verify() {
    let signer = HandshakeSigner::new(SECRET);
    let sid = ScriptId::new();
    let (token, claims) = signer.issue(sid, Some("hw"), "1.2.3.4", now()).unwrap();

    assert_eq!(token.split('.').count(), 2);
    assert_eq!(claims.exp - claims.iat, HANDSHAKE_TOKEN_TTL_SECS);
    let verified = signer.verify(&token, now()).unwrap();
    assert_eq!(verified, claims);
    assert_eq!(verified.ip, "1.2.3.4");
}

#[test]
fn tokens_are_unique() {
    let signer = HandshakeSigner::new(SECRET);
    let sid = ScriptId::new();
    let (a, _) = signer.issue(sid, None, "ip", now()).unwrap();
    let (b, _) = signer.issue(sid, None, "ip", now()).unwrap();
    assert_ne!(a, b);
}

#[test]
fn expires_after_thirty_seconds() {
    let signer = HandshakeSigner::new(SECRET);
    let (token, _) = signer.issue(ScriptId::new(), None, "ip", now()).unwrap();
    assert!(signer.verify(&token, now() + Duration::seconds(29)).is_ok());
    let err = signer.verify(&token, now() + Duration::seconds(30)).unwrap_err();
    assert!(matches!(err, LicenseError::Expired("Handshake token")));
    assert_eq!(
        GateError::from(err),
        GateError::Expired("Handshake token".into())
    );
}

#[test]
fn wrong_secret_rejected() {
    let (token, _) = HandshakeSigner::new(SECRET)
        .issue(ScriptId::new(), None, "ip", now())
        .unwrap();
    let other = HandshakeSigner::new(b"another-secret".to_vec());
    assert!(matches!(
        other.verify(&token, now()),
        Err(LicenseError::InvalidSignature)
    ));
}

#[test]
fn tampered_payload_rejected() {
    let signer = HandshakeSigner::new(SECRET);
    let sid = ScriptId::new();
    let (token, claims) = signer.issue(sid, None, "ip", now()).unwrap();
    let sig = token.split('.').nth(1).unwrap();

    let mut forged = claims.clone();
    forged.exp += 3600;
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
    let forged_token = format!("{payload}.{sig}");
    assert!(matches!(
        signer.verify(&forged_token, now()),
        Err(LicenseError::InvalidSignature)
    ));
}

#[test]
fn malformed_tokens_rejected() {
    let signer = HandshakeSigner::new(SECRET);
    for bad in ["", "onlyonepart", "a.b.c", "abc.!!!"] {
        let err = signer.verify(bad, now()).unwrap_err();
        assert!(
            matches!(
                err,
                LicenseError::InvalidTokenFormat(_) | LicenseError::InvalidSignature
            ),
            "{bad}: {err}"
        );
    }
}

#[test]
fn binding_checked() {
    let signer = HandshakeSigner::new(SECRET);
    let sid = ScriptId::new();
    let (token, _) = signer.issue(sid, Some("hw-a"), "ip", now()).unwrap();

    assert!(signer.verify_for(&token, &sid, Some("hw-a"), now()).is_ok());
    assert!(matches!(
        signer.verify_for(&token, &ScriptId::new(), Some("hw-a"), now()),
        Err(LicenseError::ScriptMismatch { .. })
    ));
    assert!(matches!(
        signer.verify_for(&token, &sid, Some("hw-b"), now()),
        Err(LicenseError::BindingMismatch("hwid"))
    ));
    assert!(matches!(
        signer.verify_for(&token, &sid, None, now()),
        Err(LicenseError::BindingMismatch("hwid"))
    ));
}

#[test]
fn debug_redacts_secret() {
    let signer = HandshakeSigner::new(SECRET);
    assert!(!format!("{signer:?}").contains("test-signing-secret"));
}
