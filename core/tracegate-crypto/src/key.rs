//! Key derivation and management.
//!
//! Uses PBKDF2-HMAC-SHA256 for deriving encryption keys from passwords.
//! Every derivation is scoped by a context string so that keys derived for
//! different purposes (chunk 0, chunk 1, stream signature) never share
//! material even under the same password and salt.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Lowest PBKDF2 iteration count accepted for production configuration.
pub const MIN_PRODUCTION_ITERATIONS: u32 = 100_000;

/// A derived encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a new derived key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Salt for key derivation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    /// Generates a random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a salt from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }

    /// Lowercase hex encoding, as sent to clients.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parses a hex-encoded salt.
    pub fn from_hex(encoded: &str) -> CryptoResult<Self> {
        let raw = hex::decode(encoded.trim()).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let bytes: [u8; SALT_SIZE] = raw.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: SALT_SIZE,
                actual: raw.len(),
            }
        })?;
        Ok(Self { bytes })
    }
}

/// Key derivation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KdfParams {
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_PRODUCTION_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Returns true if the parameters meet the production floor.
    #[must_use]
    pub fn is_production_grade(&self) -> bool {
        self.iterations >= MIN_PRODUCTION_ITERATIONS
    }
}

/// Derives a context-scoped key from a password using PBKDF2-HMAC-SHA256.
///
/// The effective PBKDF2 salt is `salt || "|" || context`.
pub fn derive_key(
    password: &str,
    salt: &Salt,
    context: &str,
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    if params.iterations == 0 {
        return Err(CryptoError::KeyDerivation(
            "iteration count must be non-zero".to_string(),
        ));
    }

    let mut scoped_salt = Vec::with_capacity(SALT_SIZE + 1 + context.len());
    scoped_salt.extend_from_slice(salt.as_bytes());
    scoped_salt.push(b'|');
    scoped_salt.extend_from_slice(context.as_bytes());

    let mut key_bytes = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        &scoped_salt,
        params.iterations,
        &mut key_bytes,
    );

    let key = DerivedKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

/// Derives the key for chunk `index` of a chunked payload.
pub fn derive_chunk_key(
    password: &str,
    salt: &Salt,
    index: u32,
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    derive_key(password, salt, &format!("chunk:{index}"), params)
}

/// Generates a random encryption key (not password-derived).
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}

/// Generates an unguessable opaque token of `len` random bytes, hex-encoded.
pub fn generate_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
