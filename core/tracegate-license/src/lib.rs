//! Credentials for the delivery protocol.
//!
//! - [`HandshakeSigner`]: stateless, HMAC-signed handshake tokens with a
//!   30-second expiry inside the signed payload
//! - [`TokenIssuer`]: stored rotating and session tokens, single use,
//!   step-counted
//! - [`Tracepath`]: the ordered handshake state machine
//! - [`KeyChecks`]: license key verification and hardware-id locking
//! - [`HwidHasher`]: salted hashing of client hardware ids

mod error;
mod handshake;
mod hwid;
mod key;
mod token;
mod tracepath;

pub use error::{LicenseError, LicenseResult};
pub use handshake::{HandshakeClaims, HandshakeSigner, HANDSHAKE_TOKEN_TTL_SECS};
pub use hwid::{hwid_matches, HwidHasher, MAX_HWID_LEN};
pub use key::{KeyChecks, DEFAULT_MAX_HWID_RESETS};
pub use token::{
    TokenBinding, TokenIssuer, DEFAULT_MAX_STEP, MAX_TOKEN_TTL_SECS, MIN_TOKEN_TTL_SECS,
};
pub use tracepath::{Tracepath, TracepathStep, DEFAULT_TRACEPATH_TTL_SECS};
