//! Authenticated encryption using ChaCha20-Poly1305.
//!
//! The tag is kept detached from the ciphertext so that the chunk protocol
//! can carry IV, ciphertext and tag as separate fields.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use rand::RngCore;

/// Size of the initialization vector in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Output of one authenticated encryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBox {
    /// Random IV, unique per encryption.
    pub iv: [u8; NONCE_SIZE],
    /// Ciphertext, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// Poly1305 authentication tag.
    pub tag: [u8; TAG_SIZE],
}

/// Encrypts `plaintext` under `key` with a fresh random IV.
pub fn auth_encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<SealedBox> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut iv = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedBox {
        iv,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypts a [`SealedBox`]. Any tampering with IV, ciphertext or tag
/// yields [`CryptoError::DecryptionFailed`].
pub fn auth_decrypt(key: &DerivedKey, sealed: &SealedBox) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.iv),
            b"",
            &mut buffer,
            Tag::from_slice(&sealed.tag),
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    Ok(buffer)
}
