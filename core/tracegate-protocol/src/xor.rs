//! Positional XOR obfuscation.
//!
//! `out[i] = in[i] ^ key[i % keylen] ^ ((i * 7 + 13) mod 256) ^ salt[i % saltlen]`
//!
//! The transform is its own inverse. It is a fast obfuscation layer for
//! clients that cannot run the AEAD path, not a confidentiality guarantee.

use crate::error::{ProtocolError, ProtocolResult};

/// Key material for the positional XOR transform.
#[derive(Clone, PartialEq, Eq)]
pub struct XorCipher {
    key: Vec<u8>,
    salt: Vec<u8>,
}

impl XorCipher {
    /// Creates a cipher. Both `key` and `salt` must be non-empty.
    pub fn new(key: impl Into<Vec<u8>>, salt: impl Into<Vec<u8>>) -> ProtocolResult<Self> {
        let key = key.into();
        let salt = salt.into();
        if key.is_empty() || salt.is_empty() {
            return Err(ProtocolError::EmptyKeyMaterial);
        }
        Ok(Self { key, salt })
    }

    /// Applies the transform. Calling it twice restores the input.
    #[must_use]
    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, &b)| {
                b ^ self.key[i % self.key.len()]
                    ^ position_mask(i)
                    ^ self.salt[i % self.salt.len()]
            })
            .collect()
    }
}

impl std::fmt::Debug for XorCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XorCipher")
            .field("key", &"[REDACTED]")
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

/// Applies the positional XOR transform in one call.
pub fn xor_transform(data: &[u8], key: &[u8], salt: &[u8]) -> ProtocolResult<Vec<u8>> {
    Ok(XorCipher::new(key, salt)?.apply(data))
}

#[inline]
fn position_mask(i: usize) -> u8 {
    // 256 divides 2^64, so wrapping arithmetic keeps the residue exact.
    (i.wrapping_mul(7).wrapping_add(13) % 256) as u8
}
