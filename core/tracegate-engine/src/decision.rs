//! Server-side threat decisions.
//!
//! The score has two parts. Authoritative signals come from the store
//! and the trusted transport: request volume for the key over the last
//! hour, the number of distinct addresses using it, and a known-bad
//! executor in the trusted header. Client signals come from the request
//! body: reported detections and a claimed executor. Client signals only
//! raise the score when an authoritative signal is already present; on
//! their own they can produce at most a warning.
//!
//! Corroborated warnings are counted per key in the store. Reaching
//! `max_warnings` bans the key. Uncorroborated warnings are shown to the
//! client and audited but never counted, so client reports alone can
//! neither ban a key nor blacklist a hardware id.

use crate::audit::{Audit, Subject};
use crate::config::DecisionConfig;
use crate::context::{ClientReport, RequestContext};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracegate_guard::Blacklist;
use tracegate_license::KeyChecks;
use tracegate_store::{GateStore, StoreResult};
use tracegate_types::{Clock, GateResult, LicenseKeyRecord, SecurityEventKind};
use tracing::{debug, info, warn};

const SCORING_WINDOW_HOURS: i64 = 1;
const VOLUME_SCORE: u32 = 25;
const DISTINCT_IP_SCORE: u32 = 30;
const BAD_EXECUTOR_SCORE: u32 = 70;
const CLAIMED_BAD_EXECUTOR_SCORE: u32 = 20;
const DETECTED_TOOL_SCORE: u32 = 10;
const MAX_DETECTED_TOOLS_SCORE: u32 = 30;

/// What the engine decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    None,
    Warning,
    TempBan,
    PermBan,
    AlreadyBanned,
}

impl DecisionOutcome {
    /// Returns true if the request must be refused.
    #[must_use]
    pub fn is_ban(self) -> bool {
        matches!(self, Self::TempBan | Self::PermBan | Self::AlreadyBanned)
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::TempBan => "temp_ban",
            Self::PermBan => "perm_ban",
            Self::AlreadyBanned => "already_banned",
        };
        f.write_str(s)
    }
}

/// A decision and the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    /// 0..=100.
    pub threat_level: u8,
    pub reasons: Vec<String>,
    /// Warning count after this decision.
    pub warnings: u32,
    /// Persisted ban reason, for ban outcomes.
    pub ban_reason: Option<String>,
    pub ban_expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            outcome: DecisionOutcome::None,
            threat_level: 0,
            reasons: Vec::new(),
            warnings: 0,
            ban_reason: None,
            ban_expires_at: None,
        }
    }

    /// Message shown to the client for a warning.
    #[must_use]
    pub fn warning_message(&self) -> Option<String> {
        (self.outcome == DecisionOutcome::Warning).then(|| match self.warnings {
            0 => "Suspicious activity detected".to_string(),
            n => format!(
                "Suspicious activity detected ({n} warning{} on record)",
                if n == 1 { "" } else { "s" }
            ),
        })
    }
}

#[derive(Debug, Default)]
struct Score {
    authoritative: u32,
    signals: u32,
    reasons: Vec<String>,
}

/// Scores requests and persists the resulting warnings and bans.
pub struct DecisionEngine {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    keys: Arc<KeyChecks>,
    blacklist: Arc<Blacklist>,
    audit: Audit,
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn GateStore>,
        clock: Arc<dyn Clock>,
        keys: Arc<KeyChecks>,
        blacklist: Arc<Blacklist>,
        audit: Audit,
        config: DecisionConfig,
    ) -> Self {
        Self {
            store,
            clock,
            keys,
            blacklist,
            audit,
            config,
        }
    }

    /// Scores one request for `key` and applies the outcome.
    ///
    /// Scoring queries that fail are logged and skipped. Persisting a
    /// warning or ban that fails is an error.
    pub fn evaluate(
        &self,
        ctx: &RequestContext,
        key: &LicenseKeyRecord,
        hwid_hash: Option<&str>,
        report: &ClientReport,
    ) -> GateResult<Decision> {
        let now = self.clock.now();
        if key.ban_active(now) {
            return Ok(Decision {
                outcome: DecisionOutcome::AlreadyBanned,
                threat_level: 100,
                reasons: vec!["key already banned".to_string()],
                warnings: 0,
                ban_reason: key.ban_reason.clone(),
                ban_expires_at: key.ban_expires_at,
            });
        }

        let score = self.score(ctx, key, report);
        let corroborated = score.authoritative > 0;
        let raw = if corroborated {
            (score.authoritative + score.signals).min(100)
        } else {
            score.signals.min(u32::from(self.config.warn_threshold))
        };
        let threat = u8::try_from(raw).unwrap_or(100);

        let outcome = if !corroborated {
            if score.signals > 0 {
                DecisionOutcome::Warning
            } else {
                DecisionOutcome::None
            }
        } else if threat >= self.config.perm_ban_threshold {
            DecisionOutcome::PermBan
        } else if threat >= self.config.temp_ban_threshold {
            DecisionOutcome::TempBan
        } else if threat >= self.config.warn_threshold || score.signals > 0 {
            DecisionOutcome::Warning
        } else {
            DecisionOutcome::None
        };

        let mut decision = Decision {
            outcome,
            threat_level: threat,
            reasons: score.reasons,
            ..Decision::allow()
        };
        let subject = Subject {
            ip: Some(&ctx.ip),
            key_id: Some(key.id),
            hwid_hash,
        };

        match outcome {
            DecisionOutcome::None | DecisionOutcome::AlreadyBanned => {}
            DecisionOutcome::Warning if corroborated => {
                self.warn(&mut decision, key, hwid_hash, subject)?;
            }
            DecisionOutcome::Warning => self.note(&mut decision, key, subject)?,
            DecisionOutcome::TempBan => {
                let reason = decision.reasons.join("; ");
                let duration = Duration::seconds(self.config.temp_ban_secs);
                self.ban(&mut decision, key, hwid_hash, reason, Some(duration), subject)?;
            }
            DecisionOutcome::PermBan => {
                let reason = decision.reasons.join("; ");
                self.ban(&mut decision, key, hwid_hash, reason, None, subject)?;
            }
        }
        Ok(decision)
    }

    fn score(&self, ctx: &RequestContext, key: &LicenseKeyRecord, report: &ClientReport) -> Score {
        let since = self.clock.now() - Duration::hours(SCORING_WINDOW_HOURS);
        let mut score = Score::default();

        let volume = fail_open(self.store.count_requests_since(&key.id, since), "request volume");
        let volume_threshold = self.config.hourly_request_threshold;
        if volume >= volume_threshold.saturating_mul(2) {
            score.authoritative += 2 * VOLUME_SCORE;
            score.reasons.push(format!("request volume {volume}/h"));
        } else if volume >= volume_threshold {
            score.authoritative += VOLUME_SCORE;
            score.reasons.push(format!("request volume {volume}/h"));
        }

        let ips = fail_open(self.store.distinct_ips_since(&key.id, since), "distinct addresses");
        if ips > self.config.distinct_ip_threshold {
            score.authoritative += DISTINCT_IP_SCORE;
            score.reasons.push(format!("{ips} distinct addresses in the last hour"));
        }

        if let Some(executor) = ctx.executor.as_deref().filter(|e| self.is_known_bad(e)) {
            score.authoritative += BAD_EXECUTOR_SCORE;
            score.reasons.push(format!("known-bad executor {executor}"));
        }

        if let Some(claimed) = report.executor.as_deref().filter(|e| self.is_known_bad(e)) {
            score.signals += CLAIMED_BAD_EXECUTOR_SCORE;
            score.reasons.push(format!("client claims executor {claimed}"));
        }

        let tools: Vec<&str> = report
            .detected_tools
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if !tools.is_empty() {
            let count = u32::try_from(tools.len()).unwrap_or(u32::MAX);
            score.signals += count
                .saturating_mul(DETECTED_TOOL_SCORE)
                .min(MAX_DETECTED_TOOLS_SCORE);
            score.reasons.push(format!("client reported {}", tools.join(", ")));
        }
        score
    }

    fn is_known_bad(&self, executor: &str) -> bool {
        let executor = executor.trim();
        self.config
            .known_bad_executors
            .iter()
            .any(|bad| bad.eq_ignore_ascii_case(executor))
    }

    /// Audits an uncorroborated warning without counting it.
    fn note(
        &self,
        decision: &mut Decision,
        key: &LicenseKeyRecord,
        subject: Subject<'_>,
    ) -> GateResult<()> {
        decision.warnings = self.store.warnings(&key.id)?;
        debug!(key = %key.id, "uncorroborated client report");
        self.audit.record(
            SecurityEventKind::Warning,
            subject,
            decision.threat_level,
            format!("uncorroborated: {}", decision.reasons.join("; ")),
        );
        Ok(())
    }

    fn warn(
        &self,
        decision: &mut Decision,
        key: &LicenseKeyRecord,
        hwid_hash: Option<&str>,
        subject: Subject<'_>,
    ) -> GateResult<()> {
        let count = self.store.increment_warnings(&key.id)?;
        decision.warnings = count;
        let max = self.config.max_warnings;
        if count < max {
            info!(key = %key.id, warnings = count, max, "warning issued");
            self.audit.record(
                SecurityEventKind::Warning,
                subject,
                decision.threat_level,
                format!("warning {count}/{max}: {}", decision.reasons.join("; ")),
            );
            return Ok(());
        }

        let reason = format!("Exceeded maximum warnings ({count}/{max})");
        let duration = self.config.escalation_ban_secs.map(Duration::seconds);
        decision.outcome = if duration.is_some() {
            DecisionOutcome::TempBan
        } else {
            DecisionOutcome::PermBan
        };
        decision.reasons.push(reason.clone());
        self.ban(decision, key, hwid_hash, reason, duration, subject)?;
        self.store.reset_warnings(&key.id)?;
        Ok(())
    }

    fn ban(
        &self,
        decision: &mut Decision,
        key: &LicenseKeyRecord,
        hwid_hash: Option<&str>,
        reason: String,
        duration: Option<Duration>,
        subject: Subject<'_>,
    ) -> GateResult<()> {
        let banned = self.keys.ban(&key.id, &reason, duration)?;
        if let Some(hwid) = hwid_hash {
            self.blacklist.ban(None, Some(hwid), &reason, duration)?;
        }
        warn!(key = %key.id, outcome = %decision.outcome, threat = decision.threat_level, %reason, "automatic ban");

        let kind = if duration.is_some() {
            SecurityEventKind::TempBan
        } else {
            SecurityEventKind::PermBan
        };
        self.audit.record(kind, subject, decision.threat_level, reason.clone());
        decision.ban_reason = Some(reason);
        decision.ban_expires_at = banned.ban_expires_at;
        Ok(())
    }
}

fn fail_open(result: StoreResult<u64>, what: &str) -> u64 {
    result.unwrap_or_else(|e| {
        warn!("scoring query for {what} failed, skipping: {e}");
        0
    })
}
