//! Hardware-id hashing.
//!
//! Client-reported hardware ids are never stored or compared in the clear.
//! Every id is trimmed, bounded and hashed with a static server salt before
//! it reaches a record, a token or a log line.

use crate::error::{LicenseError, LicenseResult};
use tracegate_crypto::{hash_identifier, timing_safe_eq};

/// Longest raw hardware id accepted.
pub const MAX_HWID_LEN: usize = 512;

/// Salted hasher for client hardware ids.
#[derive(Clone)]
pub struct HwidHasher {
    salt: String,
}

impl HwidHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Hashes a raw hardware id.
    pub fn hash(&self, raw: &str) -> LicenseResult<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LicenseError::InvalidHwid("hwid is empty"));
        }
        if trimmed.len() > MAX_HWID_LEN {
            return Err(LicenseError::InvalidHwid("hwid is too long"));
        }
        Ok(hash_identifier(trimmed, &self.salt))
    }

    /// Hashes an optional hardware id; absent or blank input yields `None`.
    pub fn hash_optional(&self, raw: Option<&str>) -> LicenseResult<Option<String>> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(value) => self.hash(value).map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for HwidHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwidHasher").field("salt", &"[REDACTED]").finish()
    }
}

/// Compares two hashed hardware ids without leaking the mismatch position.
pub fn hwid_matches(a: &str, b: &str) -> bool {
    timing_safe_eq(a.as_bytes(), b.as_bytes())
}
