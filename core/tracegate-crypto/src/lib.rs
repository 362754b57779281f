//! Cryptographic primitives for Tracegate.
//!
//! All functions are pure. Failures surface as explicit
//! [`CryptoError::InvalidSignature`] or [`CryptoError::DecryptionFailed`]
//! values.
//!
//! # Primitives
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256, scoped per context
//! - **AEAD**: ChaCha20-Poly1305 with a detached tag
//! - **Signing**: HMAC-SHA256 with timing-safe verification
//! - **Identifier hashing**: salted SHA-256 for hardware ids

mod cipher;
mod error;
mod hash;
mod key;
mod signing;

pub use cipher::{auth_decrypt, auth_encrypt, SealedBox, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use hash::{hash_identifier, sha256, sha256_hex};
pub use key::{
    derive_chunk_key, derive_key, generate_random_key, generate_token, DerivedKey, KdfParams,
    Salt, KEY_SIZE, MIN_PRODUCTION_ITERATIONS, SALT_SIZE,
};
pub use signing::{
    hmac_sign, hmac_sign_hex, hmac_verify, hmac_verify_hex, timing_safe_eq, SIGNATURE_SIZE,
};
