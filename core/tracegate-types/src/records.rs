//! Persisted records of the delivery protocol.
//!
//! These are the shapes that cross the persistence boundary. Behaviour
//! that needs configuration or a store lives in the crates that own it;
//! only self-contained predicates are defined here.

use crate::ids::{KeyId, ScriptId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A protected payload as stored by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRecord {
    /// Script identifier.
    pub id: ScriptId,
    /// Display name.
    pub name: String,
    /// Source text delivered to clients.
    pub source: String,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl ScriptRecord {
    /// Creates a script record with a fresh id.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: ScriptId::new(),
            name: name.into(),
            source: source.into(),
            updated_at: Utc::now(),
        }
    }
}

/// A bearer license key bound to one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseKeyRecord {
    /// Record identifier.
    pub id: KeyId,
    /// The secret key value presented by clients.
    pub value: String,
    /// The script this key unlocks.
    pub script_id: ScriptId,
    /// Salted HWID hash the key is locked to, if any.
    pub hwid_hash: Option<String>,
    /// How many times the key has been bound to a hardware id.
    pub hwid_reset_count: u32,
    /// Hard expiry, or `None` for lifetime keys.
    pub expires_at: Option<DateTime<Utc>>,
    /// Ban flag.
    pub banned: bool,
    /// Persisted ban reason.
    pub ban_reason: Option<String>,
    /// When a temporary ban lifts; `None` with `banned` means permanent.
    pub ban_expires_at: Option<DateTime<Utc>>,
    /// Number of successful validations.
    pub use_count: u64,
    /// Time of the last successful validation.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Address of the last successful validation.
    pub last_ip: Option<String>,
    /// Optional external identity (chat account, storefront order).
    pub external_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl LicenseKeyRecord {
    /// Creates an unlocked, unbanned, non-expiring key for `script_id`.
    pub fn new(script_id: ScriptId, value: impl Into<String>) -> Self {
        Self {
            id: KeyId::new(),
            value: value.into(),
            script_id,
            hwid_hash: None,
            hwid_reset_count: 0,
            expires_at: None,
            banned: false,
            ban_reason: None,
            ban_expires_at: None,
            use_count: 0,
            last_used_at: None,
            last_ip: None,
            external_id: None,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the key has passed its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Returns true if the key is banned and the ban has not lapsed.
    #[must_use]
    pub fn ban_active(&self, now: DateTime<Utc>) -> bool {
        self.banned && self.ban_expires_at.is_none_or(|exp| now < exp)
    }
}

/// A ban on an IP address and/or hardware id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// Banned address.
    pub ip: Option<String>,
    /// Banned salted HWID hash.
    pub hwid_hash: Option<String>,
    /// Why the ban was issued.
    pub reason: String,
    /// When the ban was issued.
    pub banned_at: DateTime<Utc>,
    /// When the ban lifts; `None` is permanent.
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlacklistEntry {
    /// Returns true while the entry still applies.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| now < exp)
    }

    /// Returns true if the entry names `ip` or `hwid_hash`.
    #[must_use]
    pub fn matches(&self, ip: Option<&str>, hwid_hash: Option<&str>) -> bool {
        let ip_hit = matches!((self.ip.as_deref(), ip), (Some(a), Some(b)) if a == b);
        let hwid_hit = matches!((self.hwid_hash.as_deref(), hwid_hash), (Some(a), Some(b)) if a == b);
        ip_hit || hwid_hit
    }
}

/// Number of tracepath states, `init` through `validated`.
pub const TRACEPATH_STATES: usize = 6;

/// One handshake attempt walking the tracepath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracepathSessionRecord {
    /// Opaque session id handed to the client.
    pub id: String,
    /// Script the handshake was opened for.
    pub script_id: ScriptId,
    /// Salted HWID hash of the client, if reported.
    pub hwid_hash: Option<String>,
    /// Index of the last completed step (0 = init).
    pub current_step: u8,
    /// Completion time of each state, indexed by step.
    pub step_completed_at: [Option<DateTime<Utc>>; TRACEPATH_STATES],
    /// Cleared once the terminal step completes or a violation is detected.
    pub valid: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
}

impl TracepathSessionRecord {
    /// Returns true if the session has passed its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Kind of stateful token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Single-use credential exchanged at each tracepath step.
    Rotating,
    /// Script-scoped token handed out with the handshake.
    Session,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rotating => write!(f, "rotating"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// A stored, single-use, step-counted token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotatingTokenRecord {
    /// Token value.
    pub token: String,
    /// Token kind.
    pub kind: TokenKind,
    /// Bound script.
    pub script_id: ScriptId,
    /// Bound salted HWID hash.
    pub hwid_hash: Option<String>,
    /// Address the token was issued to.
    pub ip: String,
    /// Rotation counter.
    pub step: u32,
    /// Rotation ceiling.
    pub max_step: u32,
    /// Cleared on consumption.
    pub valid: bool,
    /// Owning key, once known.
    pub key_id: Option<KeyId>,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
}

impl RotatingTokenRecord {
    /// Returns true if the token is still usable at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.valid && now < self.expires_at
    }
}

/// Connection state of a delivery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Heartbeating normally.
    Active,
    /// Kicked by an operator or the decision engine.
    Kicked,
    /// Closed because the key or client was banned.
    Banned,
    /// Closed by the client or by timeout.
    Disconnected,
}

impl ConnectionStatus {
    /// Returns true for statuses that end the session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Kicked => "kicked",
            Self::Banned => "banned",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// A live, heartbeating delivery session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySession {
    /// Opaque session token sent in the heartbeat header.
    pub token: String,
    /// Key that unlocked the delivery.
    pub key_id: KeyId,
    /// Script that was delivered.
    pub script_id: ScriptId,
    /// Salted HWID hash of the client.
    pub hwid_hash: Option<String>,
    /// Client address at validation time.
    pub ip: String,
    /// Executor identity string.
    pub executor: Option<String>,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Why the session was kicked or banned.
    pub status_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last heartbeat.
    pub last_heartbeat: DateTime<Utc>,
}

/// A fixed-window request counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    /// Requests counted in the current window.
    pub count: u32,
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
    /// Cooldown after a breach.
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateWindow {
    /// Opens an empty window at `now`.
    #[must_use]
    pub fn starting(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            blocked_until: None,
        }
    }

    /// Returns true while a breach cooldown is in force.
    #[must_use]
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

/// A generated pipeline layer persisted per content version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedLayer {
    /// Script the layer belongs to.
    pub script_id: ScriptId,
    /// Layer number (1..=7).
    pub layer: u8,
    /// Content-hash version of the script source.
    pub version: String,
    /// Generated text.
    pub body: String,
    /// Generation time.
    pub created_at: DateTime<Utc>,
}

/// Category of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Decision engine issued a warning.
    Warning,
    /// Decision engine issued a temporary ban.
    TempBan,
    /// Decision engine or operator issued a permanent ban.
    PermBan,
    /// A ban was lifted.
    Unban,
    /// A delivery session was kicked.
    Kick,
    /// A replayed nonce or request hash was rejected.
    Replay,
    /// A tracepath sequence violation.
    SequenceViolation,
    /// A credential failed verification.
    InvalidCredential,
    /// A rate limit was breached.
    RateLimited,
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Warning => "warning",
            Self::TempBan => "temp_ban",
            Self::PermBan => "perm_ban",
            Self::Unban => "unban",
            Self::Kick => "kick",
            Self::Replay => "replay",
            Self::SequenceViolation => "sequence_violation",
            Self::InvalidCredential => "invalid_credential",
            Self::RateLimited => "rate_limited",
        };
        f.write_str(s)
    }
}

/// An audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Event category.
    pub kind: SecurityEventKind,
    /// Client address.
    pub ip: Option<String>,
    /// Key involved, if known.
    pub key_id: Option<KeyId>,
    /// Salted HWID hash, if known.
    pub hwid_hash: Option<String>,
    /// Threat level at the time of the event (0..=100).
    pub threat_level: u8,
    /// Human-readable detail.
    pub detail: String,
    /// Event time.
    pub at: DateTime<Utc>,
}

/// One accepted request, used for volume and distinct-IP scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    /// Key the request presented, if any.
    pub key_id: Option<KeyId>,
    /// Client address.
    pub ip: String,
    /// Endpoint name.
    pub endpoint: String,
    /// Request time.
    pub at: DateTime<Utc>,
}
