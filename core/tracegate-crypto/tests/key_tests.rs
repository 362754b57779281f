use tracegate_crypto::{
    derive_chunk_key, derive_key, generate_token, CryptoError, KdfParams, Salt,
    MIN_PRODUCTION_ITERATIONS, SALT_SIZE,
};

fn fast() -> KdfParams {
    KdfParams { iterations: 16 }
}

#[test]
fn default_params_meet_production_floor() {
    let params = KdfParams::default();
    assert_eq!(params.iterations, MIN_PRODUCTION_ITERATIONS);
    assert!(params.is_production_grade());
    assert!(!fast().is_production_grade());
}

#[test]
fn derivation_is_deterministic() {
    let salt = Salt::from_bytes([9u8; SALT_SIZE]);
    let a = derive_key("pw", &salt, "ctx", &fast()).unwrap();
    let b = derive_key("pw", &salt, "ctx", &fast()).unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn context_separates_keys() {
    let salt = Salt::from_bytes([9u8; SALT_SIZE]);
    let a = derive_key("pw", &salt, "a", &fast()).unwrap();
    let b = derive_key("pw", &salt, "b", &fast()).unwrap();
    assert_ne!(a.as_bytes(), b.as_bytes());
}

#[test]
fn chunk_keys_differ_per_index() {
    let salt = Salt::random();
    let k0 = derive_chunk_key("pw", &salt, 0, &fast()).unwrap();
    let k1 = derive_chunk_key("pw", &salt, 1, &fast()).unwrap();
    assert_ne!(k0.as_bytes(), k1.as_bytes());
}

#[test]
fn zero_iterations_rejected() {
    let salt = Salt::random();
    let err = derive_key("pw", &salt, "ctx", &KdfParams { iterations: 0 }).unwrap_err();
    assert!(matches!(err, CryptoError::KeyDerivation(_)));
}

#[test]
fn derived_key_debug_is_redacted() {
    let key = derive_key("pw", &Salt::random(), "ctx", &fast()).unwrap();
    let debug = format!("{key:?}");
    assert!(debug.contains("REDACTED"));
}

#[test]
fn salt_hex_roundtrip() {
    let salt = Salt::random();
    let hex = salt.to_hex();
    assert_eq!(hex.len(), SALT_SIZE * 2);
    assert_eq!(Salt::from_hex(&hex).unwrap(), salt);
}

#[test]
fn salt_hex_wrong_length() {
    let err = Salt::from_hex("abcd").unwrap_err();
    assert_eq!(
        err,
        CryptoError::InvalidKeyLength {
            expected: SALT_SIZE,
            actual: 2
        }
    );
    assert!(matches!(Salt::from_hex("zz"), Err(CryptoError::Encoding(_))));
}

#[test]
fn tokens_are_random_hex() {
    let a = generate_token(24);
    let b = generate_token(24);
    assert_eq!(a.len(), 48);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a, b);
}
