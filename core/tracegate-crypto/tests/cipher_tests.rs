use tracegate_crypto::{auth_decrypt, auth_encrypt, generate_random_key, CryptoError, TAG_SIZE};

#[test]
fn encrypt_decrypt_roundtrip() {
    let key = generate_random_key();
    let sealed = auth_encrypt(&key, b"print('hello')").unwrap();
    assert_eq!(auth_decrypt(&key, &sealed).unwrap(), b"print('hello')");
}

#[test]
fn encrypt_decrypt_empty() {
    let key = generate_random_key();
    let sealed = auth_encrypt(&key, b"").unwrap();
    assert!(sealed.ciphertext.is_empty());
    assert_eq!(auth_decrypt(&key, &sealed).unwrap(), b"");
}

#[test]
fn ciphertext_has_plaintext_length() {
    let key = generate_random_key();
    let sealed = auth_encrypt(&key, &[7u8; 1000]).unwrap();
    assert_eq!(sealed.ciphertext.len(), 1000);
    assert_eq!(sealed.tag.len(), TAG_SIZE);
}

#[test]
fn wrong_key_fails_decryption() {
    let sealed = auth_encrypt(&generate_random_key(), b"Secret").unwrap();
    assert_eq!(
        auth_decrypt(&generate_random_key(), &sealed),
        Err(CryptoError::DecryptionFailed)
    );
}

#[test]
fn tampered_ciphertext_fails() {
    let key = generate_random_key();
    let mut sealed = auth_encrypt(&key, b"Secret").unwrap();
    sealed.ciphertext[0] ^= 0x01;
    assert_eq!(auth_decrypt(&key, &sealed), Err(CryptoError::DecryptionFailed));
}

#[test]
fn tampered_tag_fails() {
    let key = generate_random_key();
    let mut sealed = auth_encrypt(&key, b"Secret").unwrap();
    sealed.tag[TAG_SIZE - 1] ^= 0x80;
    assert_eq!(auth_decrypt(&key, &sealed), Err(CryptoError::DecryptionFailed));
}

#[test]
fn tampered_iv_fails() {
    let key = generate_random_key();
    let mut sealed = auth_encrypt(&key, b"Secret").unwrap();
    sealed.iv[0] ^= 0xFF;
    assert_eq!(auth_decrypt(&key, &sealed), Err(CryptoError::DecryptionFailed));
}

#[test]
fn same_plaintext_produces_different_ciphertext() {
    let key = generate_random_key();
    let a = auth_encrypt(&key, b"Same").unwrap();
    let b = auth_encrypt(&key, b"Same").unwrap();
    assert_ne!(a.iv, b.iv);
    assert_ne!(a.ciphertext, b.ciphertext);
}
