//! Abuse defenses that run before any credential is examined.
//!
//! - [`Blacklist`]: IP and hardware-id bans, checked first on every entry
//!   point
//! - [`RateLimiter`]: per-identifier, per-endpoint request budgets with a
//!   cooldown after a breach
//! - [`ReplayGuard`]: single-use nonces and request hashes
//!
//! Each component keeps a [`DenyCache`] in front of the shared
//! [`GateStore`](tracegate_store::GateStore). The cache can only short-circuit a
//! denial; every miss is resolved by the store, and a store failure is an
//! error for the caller to deny on.

mod blacklist;
mod cache;
mod rate_limit;
mod replay;

pub use blacklist::Blacklist;
pub use cache::{DenyCache, DEFAULT_CACHE_CAPACITY};
pub use rate_limit::{RateDecision, RateLimiter, RateRule, COOLDOWN_WINDOWS};
pub use replay::{request_hash, ReplayGuard};
