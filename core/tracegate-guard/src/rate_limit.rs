//! Fixed-window rate limiting with a breach cooldown.
//!
//! Counters live in the store so every instance shares them. A breach
//! blocks the identifier for [`COOLDOWN_WINDOWS`] windows measured from
//! the breach; the cooldown replaces the current window, and the first
//! request after it ends opens a fresh one.

use crate::cache::DenyCache;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracegate_store::GateStore;
use tracegate_types::{Clock, GateError, GateResult, RateWindow};
use tracing::warn;

/// Cooldown length after a breach, in windows.
pub const COOLDOWN_WINDOWS: i32 = 2;

/// A request budget for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    /// Requests admitted per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u32,
}

impl RateRule {
    pub const fn new(max_requests: u32, window_secs: u32) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(i64::from(self.window_secs))
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window (or cooldown) ends.
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Whole seconds until `reset_at`, at least one.
    #[must_use]
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(1) as u64
    }
}

/// Per-identifier, per-endpoint request limiter.
pub struct RateLimiter {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    cooldowns: DenyCache<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn GateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cooldowns: DenyCache::default(),
        }
    }

    /// Counts one request from `identifier` against `endpoint`'s rule.
    pub fn check(&self, identifier: &str, endpoint: &str, rule: &RateRule) -> GateResult<RateDecision> {
        let now = self.clock.now();
        let key = format!("{endpoint}:{identifier}");

        if let Some(until) = self.cooldowns.get(&key, now) {
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: until,
            });
        }

        let mut decision = None;
        let window = self.store.update_rate_window(&key, &mut |current| {
            let (next, outcome) = step(current, rule, now);
            decision = Some(outcome);
            next
        })?;
        let decision = decision.unwrap_or(RateDecision {
            allowed: false,
            remaining: 0,
            reset_at: now + rule.window(),
        });

        if let Some(until) = window.blocked_until.filter(|_| !decision.allowed) {
            self.cooldowns.insert(key, until, until, now);
        }
        Ok(decision)
    }

    /// Like [`check`](Self::check), failing with
    /// [`GateError::RateLimited`] when the request is not admitted.
    pub fn enforce(&self, identifier: &str, endpoint: &str, rule: &RateRule) -> GateResult<RateDecision> {
        let decision = self.check(identifier, endpoint, rule)?;
        if decision.allowed {
            return Ok(decision);
        }
        warn!(identifier, endpoint, reset_at = %decision.reset_at, "rate limit exceeded");
        Err(GateError::RateLimited {
            retry_after_secs: decision.retry_after_secs(self.clock.now()),
        })
    }

    /// Drops expired cooldown cache entries.
    pub fn sweep_cache(&self) -> usize {
        self.cooldowns.sweep(self.clock.now())
    }
}

/// Advances a window by one request.
fn step(current: Option<RateWindow>, rule: &RateRule, now: DateTime<Utc>) -> (RateWindow, RateDecision) {
    let window_len = rule.window();
    let mut window = match current {
        Some(w) if w.is_blocked(now) => {
            let reset_at = w.blocked_until.unwrap_or(now);
            return (
                w,
                RateDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at,
                },
            );
        }
        Some(w) if w.blocked_until.is_none() && now < w.window_start + window_len => w,
        _ => RateWindow::starting(now),
    };

    if window.count >= rule.max_requests {
        let until = now + window_len * COOLDOWN_WINDOWS;
        window.blocked_until = Some(until);
        return (
            window,
            RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: until,
            },
        );
    }

    window.count += 1;
    let decision = RateDecision {
        allowed: true,
        remaining: rule.max_requests - window.count,
        reset_at: window.window_start + window_len,
    };
    (window, decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_counts_then_blocks() {
        let rule = RateRule::new(2, 10);
        let now = Utc::now();
        let (w, d) = step(None, &rule, now);
        assert!(d.allowed);
        assert_eq!(d.remaining, 1);
        let (w, d) = step(Some(w), &rule, now);
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);
        let (w, d) = step(Some(w), &rule, now);
        assert!(!d.allowed);
        assert_eq!(w.blocked_until, Some(now + Duration::seconds(20)));
    }

    #[test]
    fn lapsed_cooldown_opens_fresh_window() {
        let rule = RateRule::new(1, 10);
        let now = Utc::now();
        let blocked = RateWindow {
            count: 1,
            window_start: now - Duration::seconds(30),
            blocked_until: Some(now - Duration::seconds(1)),
        };
        let (w, d) = step(Some(blocked), &rule, now);
        assert!(d.allowed);
        assert_eq!(w.count, 1);
        assert_eq!(w.window_start, now);
        assert_eq!(w.blocked_until, None);
    }
}
