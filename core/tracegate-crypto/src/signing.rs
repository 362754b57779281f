//! HMAC-SHA256 signing and timing-safe verification.

use crate::error::{CryptoError, CryptoResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Size of an HMAC-SHA256 signature in bytes.
pub const SIGNATURE_SIZE: usize = 32;

/// Signs `data` with `secret`.
pub fn hmac_sign(data: &[u8], secret: &[u8]) -> CryptoResult<[u8; SIGNATURE_SIZE]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: SIGNATURE_SIZE,
            actual: secret.len(),
        }
    })?;
    mac.update(data);
    let out = mac.finalize().into_bytes();

    let mut sig = [0u8; SIGNATURE_SIZE];
    sig.copy_from_slice(&out);
    Ok(sig)
}

/// Signs `data` and returns the lowercase hex signature.
pub fn hmac_sign_hex(data: &[u8], secret: &[u8]) -> CryptoResult<String> {
    Ok(hex::encode(hmac_sign(data, secret)?))
}

/// Verifies `signature` over `data`.
pub fn hmac_verify(data: &[u8], secret: &[u8], signature: &[u8]) -> CryptoResult<()> {
    let expected = hmac_sign(data, secret)?;
    if timing_safe_eq(&expected, signature) {
        Ok(())
    } else {
        Err(CryptoError::InvalidSignature)
    }
}

/// Verifies a hex-encoded signature over `data`.
///
/// Malformed hex is reported as [`CryptoError::InvalidSignature`] so that
/// callers cannot distinguish it from a wrong signature.
pub fn hmac_verify_hex(data: &[u8], secret: &[u8], signature_hex: &str) -> CryptoResult<()> {
    let signature = hex::decode(signature_hex.trim()).map_err(|_| CryptoError::InvalidSignature)?;
    hmac_verify(data, secret, &signature)
}

/// Compares two byte slices in constant time with respect to their content.
///
/// Only the lengths may leak; the position of the first differing byte
/// does not affect timing.
pub fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        // Still walk `a` so a length mismatch costs about the same as a
        // content mismatch.
        let _ = a.ct_eq(a);
        return false;
    }
    a.ct_eq(b).into()
}
