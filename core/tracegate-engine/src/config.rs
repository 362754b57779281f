//! Gate configuration.
//!
//! Loaded from TOML. Every field has a default so a config file only needs
//! to name what it changes; the two secrets have no usable default and
//! must be supplied (the gateway binary also reads them from the
//! environment).

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracegate_crypto::MIN_PRODUCTION_ITERATIONS;
use tracegate_guard::RateRule;
use tracegate_license::{
    DEFAULT_MAX_HWID_RESETS, DEFAULT_MAX_STEP, DEFAULT_TRACEPATH_TTL_SECS,
    HANDSHAKE_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS, MIN_TOKEN_TTL_SECS,
};
use tracegate_protocol::{DEFAULT_AEAD_CHUNK_SIZE, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// Upper bound on the per-call store budget.
pub const MAX_STORE_BUDGET_MS: u64 = 9_000;

const MIN_SECRET_LEN: usize = 16;

/// Errors from loading or validating a [`GateConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level gate configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// HMAC secret for handshake tokens and session salts.
    pub signing_secret: String,
    /// Static salt for hardware-id hashing.
    pub hwid_salt: String,
    pub handshake_ttl_secs: i64,
    /// Rotating and session token lifetime, 15..=30 seconds.
    pub token_ttl_secs: i64,
    pub max_token_steps: u32,
    pub tracepath_ttl_secs: i64,
    /// How long a consumed nonce or request hash is remembered.
    pub nonce_ttl_secs: i64,
    /// Accepted distance between a signed request timestamp and now.
    pub clock_skew_secs: i64,
    pub max_hwid_resets: u32,
    /// Executor identities accepted from the trusted header. Empty admits
    /// any executor.
    pub allowed_executors: Vec<String>,
    /// Honour `X-Forwarded-For` for the client address.
    pub trust_proxy_headers: bool,
    /// Per-call budget for store work, in milliseconds.
    pub store_budget_ms: u64,
    pub require: Requirements,
    pub decision: DecisionConfig,
    pub rate_limits: RateLimits,
    pub protection: ProtectionFlags,
    pub crypto: CryptoConfig,
    pub heartbeat: HeartbeatConfig,
    pub webhook: WebhookConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            hwid_salt: String::new(),
            handshake_ttl_secs: HANDSHAKE_TOKEN_TTL_SECS,
            token_ttl_secs: 20,
            max_token_steps: DEFAULT_MAX_STEP,
            tracepath_ttl_secs: DEFAULT_TRACEPATH_TTL_SECS,
            nonce_ttl_secs: 300,
            clock_skew_secs: 60,
            max_hwid_resets: DEFAULT_MAX_HWID_RESETS,
            allowed_executors: Vec::new(),
            trust_proxy_headers: false,
            store_budget_ms: 5_000,
            require: Requirements::default(),
            decision: DecisionConfig::default(),
            rate_limits: RateLimits::default(),
            protection: ProtectionFlags::default(),
            crypto: CryptoConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl std::fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateConfig")
            .field("signing_secret", &"[REDACTED]")
            .field("hwid_salt", &"[REDACTED]")
            .field("handshake_ttl_secs", &self.handshake_ttl_secs)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("max_token_steps", &self.max_token_steps)
            .field("tracepath_ttl_secs", &self.tracepath_ttl_secs)
            .field("nonce_ttl_secs", &self.nonce_ttl_secs)
            .field("clock_skew_secs", &self.clock_skew_secs)
            .field("max_hwid_resets", &self.max_hwid_resets)
            .field("allowed_executors", &self.allowed_executors)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("store_budget_ms", &self.store_budget_ms)
            .field("require", &self.require)
            .field("decision", &self.decision)
            .field("rate_limits", &self.rate_limits)
            .field("protection", &self.protection)
            .field("crypto", &self.crypto)
            .field("heartbeat", &self.heartbeat)
            .field("webhook", &self.webhook)
            .finish()
    }
}

impl GateConfig {
    /// Reads and parses a TOML file. Does not validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Checks the settings the engine relies on for its guarantees.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.signing_secret.len() < MIN_SECRET_LEN {
            return invalid(format!(
                "signing_secret must be at least {MIN_SECRET_LEN} bytes"
            ));
        }
        if self.hwid_salt.is_empty() {
            return invalid("hwid_salt must be set");
        }
        if self.crypto.pbkdf2_iterations < MIN_PRODUCTION_ITERATIONS {
            return invalid(format!(
                "crypto.pbkdf2_iterations must be at least {MIN_PRODUCTION_ITERATIONS}"
            ));
        }
        if !(1..=MAX_STORE_BUDGET_MS).contains(&self.store_budget_ms) {
            return invalid(format!(
                "store_budget_ms must be between 1 and {MAX_STORE_BUDGET_MS}"
            ));
        }
        if !(MIN_TOKEN_TTL_SECS..=MAX_TOKEN_TTL_SECS).contains(&self.token_ttl_secs) {
            return invalid(format!(
                "token_ttl_secs must be between {MIN_TOKEN_TTL_SECS} and {MAX_TOKEN_TTL_SECS}"
            ));
        }
        if self.handshake_ttl_secs <= 0 || self.tracepath_ttl_secs <= 0 || self.nonce_ttl_secs <= 0
        {
            return invalid("ttl values must be positive");
        }
        if self.clock_skew_secs < 0 {
            return invalid("clock_skew_secs must not be negative");
        }
        // a request must fall out of the skew window before its marker expires
        if self.nonce_ttl_secs <= 2 * self.clock_skew_secs {
            return invalid("nonce_ttl_secs must exceed twice clock_skew_secs");
        }
        if self.crypto.binary_chunk_size == 0 || self.crypto.binary_chunk_size > MAX_CHUNK_SIZE {
            return invalid(format!(
                "crypto.binary_chunk_size must be between 1 and {MAX_CHUNK_SIZE}"
            ));
        }
        if self.crypto.aead_chunk_size == 0 {
            return invalid("crypto.aead_chunk_size must be positive");
        }
        if self.heartbeat.interval_secs == 0
            || self.heartbeat.timeout_secs < self.heartbeat.interval_secs
        {
            return invalid("heartbeat.timeout_secs must be at least heartbeat.interval_secs");
        }
        self.decision.validate()?;
        self.rate_limits.validate()
    }

    /// The per-call store budget.
    #[must_use]
    pub fn store_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_budget_ms)
    }
}

fn invalid<T>(msg: impl Into<String>) -> ConfigResult<T> {
    Err(ConfigError::Invalid(msg.into()))
}

/// Which optional credentials the validation endpoint insists on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    /// Validation must carry a handshake token.
    pub handshake_token: bool,
    /// Validation must complete a tracepath session.
    pub tracepath: bool,
    /// Tracepath steps must present a rotating token.
    pub rotating_token: bool,
    /// Validation must carry a signed, timestamped request.
    pub signature: bool,
    /// Validation must carry a nonce.
    pub nonce: bool,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            handshake_token: false,
            tracepath: false,
            rotating_token: true,
            signature: false,
            nonce: true,
        }
    }
}

/// Decision engine thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Warnings per key before an automatic ban.
    pub max_warnings: u32,
    pub warn_threshold: u8,
    pub temp_ban_threshold: u8,
    pub perm_ban_threshold: u8,
    pub temp_ban_secs: i64,
    /// Ban length when warnings escalate. `None` bans permanently.
    pub escalation_ban_secs: Option<i64>,
    /// Validations per key per hour before volume counts against it.
    pub hourly_request_threshold: u64,
    /// Distinct client addresses per key per hour before it counts
    /// against it.
    pub distinct_ip_threshold: u64,
    /// Executor identities that are never legitimate.
    pub known_bad_executors: Vec<String>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_warnings: 3,
            warn_threshold: 30,
            temp_ban_threshold: 60,
            perm_ban_threshold: 90,
            temp_ban_secs: 3_600,
            escalation_ban_secs: None,
            hourly_request_threshold: 120,
            distinct_ip_threshold: 5,
            known_bad_executors: Vec::new(),
        }
    }
}

impl DecisionConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_warnings == 0 {
            return invalid("decision.max_warnings must be positive");
        }
        if !(self.warn_threshold <= self.temp_ban_threshold
            && self.temp_ban_threshold <= self.perm_ban_threshold
            && self.perm_ban_threshold <= 100)
        {
            return invalid("decision thresholds must satisfy warn <= temp_ban <= perm_ban <= 100");
        }
        if self.temp_ban_secs <= 0 || self.escalation_ban_secs.is_some_and(|s| s <= 0) {
            return invalid("decision ban lengths must be positive");
        }
        Ok(())
    }
}

/// Request budgets per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub handshake: RateRule,
    pub tracepath: RateRule,
    pub validate: RateRule,
    pub heartbeat: RateRule,
    pub loader: RateRule,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            handshake: RateRule::new(10, 60),
            tracepath: RateRule::new(30, 60),
            validate: RateRule::new(10, 60),
            heartbeat: RateRule::new(12, 60),
            loader: RateRule::new(60, 60),
        }
    }
}

impl RateLimits {
    fn validate(&self) -> ConfigResult<()> {
        let rules = [
            ("handshake", self.handshake),
            ("tracepath", self.tracepath),
            ("validate", self.validate),
            ("heartbeat", self.heartbeat),
            ("loader", self.loader),
        ];
        for (name, rule) in rules {
            if rule.max_requests == 0 || rule.window_secs == 0 {
                return invalid(format!("rate_limits.{name} must be non-zero"));
            }
        }
        Ok(())
    }
}

/// Client-side protection toggles returned by the `flags` tracepath step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionFlags {
    pub anti_debug: bool,
    pub anti_hook: bool,
    pub integrity_check: bool,
    pub environment_check: bool,
    /// Disconnect the client when tampering is detected locally.
    pub kick_on_tamper: bool,
    /// The client must keep a heartbeat session open.
    pub heartbeat_required: bool,
    /// Local detections tolerated before the client reports and exits.
    pub max_detections: u32,
    pub check_interval_secs: u32,
}

impl Default for ProtectionFlags {
    fn default() -> Self {
        Self {
            anti_debug: true,
            anti_hook: true,
            integrity_check: true,
            environment_check: true,
            kick_on_tamper: true,
            heartbeat_required: true,
            max_detections: 3,
            check_interval_secs: 10,
        }
    }
}

/// Payload encryption parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub pbkdf2_iterations: u32,
    pub aead_chunk_size: usize,
    pub binary_chunk_size: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: MIN_PRODUCTION_ITERATIONS,
            aead_chunk_size: DEFAULT_AEAD_CHUNK_SIZE,
            binary_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Heartbeat cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval the client is told to use.
    pub interval_secs: u64,
    /// Silence after which a session is treated as gone.
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 90,
        }
    }
}

/// Security event webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 5,
        }
    }
}
