//! Request orchestration.
//!
//! [`Gate`] owns every component and exposes one synchronous method per
//! protocol endpoint plus the operator actions. Each entry point checks
//! the blacklist before anything else. The HTTP layer runs these methods
//! through [`run_bounded`] so a slow store cannot hold a request open.

use crate::audit::{Audit, Subject};
use crate::config::{ConfigResult, GateConfig};
use crate::context::RequestContext;
use crate::decision::DecisionEngine;
use crate::heartbeat::{HeartbeatRequest, HeartbeatResponse, HeartbeatService};
use crate::messages::{
    DeliveryMode, Endpoints, EndpointsResponse, FlagsResponse, HandshakeRequest,
    HandshakeResponse, InfoResponse, StepAck, StepRequest, ValidateRequest, ValidateResponse,
};
use crate::notify::Notifier;
use crate::pipeline::{DefaultTemplates, LayerOutput, LayerTemplate, Pipeline};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracegate_crypto::{generate_token, hmac_sign_hex, hmac_verify_hex, sha256, sha256_hex, KdfParams};
use tracegate_guard::{request_hash, Blacklist, RateLimiter, RateRule, ReplayGuard};
use tracegate_license::{
    hwid_matches, HandshakeSigner, HwidHasher, KeyChecks, TokenBinding, TokenIssuer, Tracepath,
    TracepathStep,
};
use tracegate_protocol::{
    encode_transport, rolling_checksum, split_into_encrypted_chunks, ChunkOptions, FrameKind,
    StreamCodec, XorCipher,
};
use tracegate_store::{GateStore, SweepReport};
use tracegate_types::{
    Clock, ConnectionStatus, DeliverySession, GateError, GateResult, KeyId, RequestLogEntry,
    ScriptId, ScriptRecord, SecurityEventKind, TracepathSessionRecord,
};
use tracing::{debug, info, warn};

const SESSION_TOKEN_BYTES: usize = 32;
const SALT_LEN: usize = 32;
const REQUEST_LOG_RETENTION_HOURS: i64 = 24;
/// Active delivery sessions not heard from for this long are abandoned.
const STALE_DELIVERY_HOURS: i64 = 24;
const EVENT_RETENTION_DAYS: i64 = 30;

/// Runs `f` on the blocking pool with a deadline.
///
/// A timeout or a panic inside `f` fails closed with
/// [`GateError::UpstreamUnavailable`].
pub async fn run_bounded<T, F>(budget: std::time::Duration, f: F) -> GateResult<T>
where
    F: FnOnce() -> GateResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(budget, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!("gate call failed to complete: {e}");
            Err(GateError::UpstreamUnavailable("gate call aborted".into()))
        }
        Err(_) => {
            warn!(budget_ms = budget.as_millis() as u64, "gate call timed out");
            Err(GateError::UpstreamUnavailable("gate call timed out".into()))
        }
    }
}

/// What an operator ban or unban applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanTarget {
    pub key_id: Option<KeyId>,
    pub ip: Option<String>,
    /// Salted HWID hash.
    pub hwid_hash: Option<String>,
}

impl BanTarget {
    fn is_empty(&self) -> bool {
        self.key_id.is_none() && self.ip.is_none() && self.hwid_hash.is_none()
    }
}

/// Rows and cache entries removed by [`Gate::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub store: SweepReport,
    pub request_log: usize,
    pub deliveries: usize,
    pub events: usize,
    pub cache_entries: usize,
}

/// The protocol engine.
pub struct Gate {
    config: GateConfig,
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    hasher: HwidHasher,
    blacklist: Arc<Blacklist>,
    rate: RateLimiter,
    replay: ReplayGuard,
    signer: HandshakeSigner,
    tokens: TokenIssuer,
    tracepath: Tracepath,
    keys: Arc<KeyChecks>,
    decision: Arc<DecisionEngine>,
    heartbeat: HeartbeatService,
    pipeline: Pipeline,
    audit: Audit,
}

impl Gate {
    /// Builds a gate with the default layer templates. Fails if `config`
    /// does not validate.
    pub fn new(
        config: GateConfig,
        store: Arc<dyn GateStore>,
        clock: Arc<dyn Clock>,
    ) -> ConfigResult<Self> {
        Self::with_templates(config, store, clock, Arc::new(DefaultTemplates))
    }

    pub fn with_templates(
        config: GateConfig,
        store: Arc<dyn GateStore>,
        clock: Arc<dyn Clock>,
        templates: Arc<dyn LayerTemplate>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let notifier = Notifier::new(
            config.webhook.url.clone(),
            std::time::Duration::from_secs(config.webhook.timeout_secs),
        );
        let audit = Audit::new(store.clone(), clock.clone(), notifier);
        let blacklist = Arc::new(Blacklist::new(store.clone(), clock.clone()));
        let keys = Arc::new(KeyChecks::new(
            store.clone(),
            clock.clone(),
            config.max_hwid_resets,
        ));
        let decision = Arc::new(DecisionEngine::new(
            store.clone(),
            clock.clone(),
            keys.clone(),
            blacklist.clone(),
            audit.clone(),
            config.decision.clone(),
        ));
        let heartbeat = HeartbeatService::new(
            store.clone(),
            clock.clone(),
            blacklist.clone(),
            decision.clone(),
            config.heartbeat,
        );

        Ok(Self {
            hasher: HwidHasher::new(config.hwid_salt.clone()),
            rate: RateLimiter::new(store.clone(), clock.clone()),
            replay: ReplayGuard::new(
                store.clone(),
                clock.clone(),
                Duration::seconds(config.nonce_ttl_secs),
            ),
            signer: HandshakeSigner::new(config.signing_secret.as_bytes().to_vec())
                .with_ttl_secs(config.handshake_ttl_secs),
            tokens: TokenIssuer::new(
                store.clone(),
                clock.clone(),
                config.token_ttl_secs,
                config.max_token_steps,
            ),
            tracepath: Tracepath::new(store.clone(), clock.clone(), config.tracepath_ttl_secs),
            pipeline: Pipeline::new(
                store.clone(),
                clock.clone(),
                templates,
                config.protection.clone(),
            ),
            blacklist,
            keys,
            decision,
            heartbeat,
            audit,
            store,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GateStore> {
        &self.store
    }

    /// Salted hash of a raw hardware id, as stored in records.
    pub fn hash_hwid(&self, raw: &str) -> GateResult<String> {
        Ok(self.hasher.hash(raw)?)
    }

    // ── Protocol endpoints ───────────────────────────────────────────

    /// Opens a handshake: verifies the key and returns the handshake
    /// token, the tracepath session and the first rotating token.
    pub fn handshake(
        &self,
        ctx: &RequestContext,
        req: &HandshakeRequest,
    ) -> GateResult<HandshakeResponse> {
        let result = self.handshake_inner(ctx, req);
        self.observe(ctx, "handshake", result)
    }

    pub fn tracepath_info(&self, ctx: &RequestContext, req: &StepRequest) -> GateResult<InfoResponse> {
        let result = self.step(ctx, req, TracepathStep::Info).and_then(|(session, ack)| {
            let script = self.script(&session.script_id)?;
            Ok(InfoResponse {
                ack,
                script_id: script.id,
                script_name: script.name,
                server_time: self.clock.unix_secs(),
            })
        });
        self.observe(ctx, "tracepath.info", result)
    }

    pub fn tracepath_endpoints(
        &self,
        ctx: &RequestContext,
        req: &StepRequest,
    ) -> GateResult<EndpointsResponse> {
        let result = self
            .step(ctx, req, TracepathStep::Endpoints)
            .map(|(session, ack)| EndpointsResponse {
                ack,
                endpoints: Endpoints::for_script(&session.script_id),
            });
        self.observe(ctx, "tracepath.endpoints", result)
    }

    pub fn tracepath_flags(&self, ctx: &RequestContext, req: &StepRequest) -> GateResult<FlagsResponse> {
        let result = self
            .step(ctx, req, TracepathStep::Flags)
            .map(|(_, ack)| FlagsResponse {
                ack,
                flags: self.config.protection.clone(),
            });
        self.observe(ctx, "tracepath.flags", result)
    }

    /// Validates a key and delivers the encrypted payload.
    pub fn validate(&self, ctx: &RequestContext, req: &ValidateRequest) -> GateResult<ValidateResponse> {
        let result = self.validate_inner(ctx, req);
        self.observe(ctx, "validate", result)
    }

    pub fn heartbeat(
        &self,
        ctx: &RequestContext,
        session_token: &str,
        req: &HeartbeatRequest,
    ) -> GateResult<HeartbeatResponse> {
        let result = self
            .entry(ctx, None, "heartbeat", &self.config.rate_limits.heartbeat)
            .and_then(|()| self.heartbeat.handle(ctx, session_token, req));
        self.observe(ctx, "heartbeat", result)
    }

    /// Returns one loader layer, optionally wrapped in a binary frame.
    pub fn loader_layer(
        &self,
        ctx: &RequestContext,
        script_id: &str,
        layer: u8,
        wrap: bool,
    ) -> GateResult<LayerOutput> {
        let result = self.loader_inner(ctx, script_id, layer, wrap);
        self.observe(ctx, "loader", result)
    }

    // ── Operator actions ─────────────────────────────────────────────

    /// Bans a key and/or identifiers. `duration` of `None` is permanent.
    pub fn ban(&self, target: &BanTarget, reason: &str, duration: Option<Duration>) -> GateResult<()> {
        if target.is_empty() {
            return Err(GateError::InvalidRequest("empty ban target".into()));
        }
        if let Some(key_id) = &target.key_id {
            self.keys.ban(key_id, reason, duration)?;
        }
        if target.ip.is_some() || target.hwid_hash.is_some() {
            self.blacklist.ban(
                target.ip.as_deref(),
                target.hwid_hash.as_deref(),
                reason,
                duration,
            )?;
        }
        let kind = if duration.is_some() {
            SecurityEventKind::TempBan
        } else {
            SecurityEventKind::PermBan
        };
        self.audit.record(kind, subject_of(target), 100, format!("operator: {reason}"));
        Ok(())
    }

    /// Lifts bans on a key and/or identifiers and clears the key's warnings.
    pub fn unban(&self, target: &BanTarget) -> GateResult<()> {
        if target.is_empty() {
            return Err(GateError::InvalidRequest("empty ban target".into()));
        }
        if let Some(key_id) = &target.key_id {
            self.keys.unban(key_id)?;
            self.store.reset_warnings(key_id)?;
        }
        if target.ip.is_some() || target.hwid_hash.is_some() {
            self.blacklist
                .unban(target.ip.as_deref(), target.hwid_hash.as_deref())?;
        }
        self.audit
            .record(SecurityEventKind::Unban, subject_of(target), 0, "operator unban");
        Ok(())
    }

    /// Kicks a delivery session; its next heartbeat gets the `kicked`
    /// directive.
    pub fn kick_session(&self, session_token: &str, reason: &str) -> GateResult<()> {
        let session = self
            .store
            .get_delivery_session(session_token)?
            .ok_or_else(|| GateError::InvalidRequest("Unknown session".into()))?;
        self.store
            .update_delivery_status(session_token, ConnectionStatus::Kicked, Some(reason))?;
        info!(key = %session.key_id, reason, "session kicked");
        self.audit.record(
            SecurityEventKind::Kick,
            Subject {
                ip: Some(&session.ip),
                key_id: Some(session.key_id),
                hwid_hash: session.hwid_hash.as_deref(),
            },
            0,
            reason,
        );
        Ok(())
    }

    /// Clears a key's hardware-id lock.
    pub fn reset_hwid(&self, key_id: &KeyId) -> GateResult<()> {
        self.keys.reset_hwid(key_id)?;
        Ok(())
    }

    /// Deletes expired state and prunes in-process caches.
    pub fn sweep(&self) -> GateResult<MaintenanceReport> {
        let now = self.clock.now();
        let store = self.store.sweep_expired(now)?;
        let request_log = self
            .store
            .prune_request_log(now - Duration::hours(REQUEST_LOG_RETENTION_HOURS))?;
        let timeout = i64::try_from(self.config.heartbeat.timeout_secs).unwrap_or(i64::MAX);
        let deliveries = self.store.prune_delivery_sessions(
            now - Duration::seconds(timeout.min(STALE_DELIVERY_HOURS * 3600)),
            now - Duration::hours(STALE_DELIVERY_HOURS),
        )?;
        let events = self
            .store
            .prune_events(now - Duration::days(EVENT_RETENTION_DAYS))?;
        let cache_entries = self.blacklist.sweep_cache()
            + self.rate.sweep_cache()
            + self.replay.sweep_cache()
            + self.tokens.sweep_cache();
        debug!(rows = store.total(), request_log, deliveries, events, cache_entries, "sweep complete");
        Ok(MaintenanceReport {
            store,
            request_log,
            deliveries,
            events,
            cache_entries,
        })
    }

    // ── Internals ────────────────────────────────────────────────────

    fn handshake_inner(
        &self,
        ctx: &RequestContext,
        req: &HandshakeRequest,
    ) -> GateResult<HandshakeResponse> {
        let hwid = self.hasher.hash_optional(req.hwid.as_deref())?;
        let hwid = hwid.as_deref();
        self.entry(ctx, hwid, "handshake", &self.config.rate_limits.handshake)?;

        let script_id = parse_script_id(&req.script_id)?;
        self.script(&script_id)?;
        let key = self.keys.verify(&req.key, &script_id, hwid)?;

        let (handshake_token, _) = self.signer.issue(script_id, hwid, &ctx.ip, self.clock.now())?;
        let session = self.tracepath.start(script_id, hwid)?;
        let binding = TokenBinding {
            script_id,
            hwid_hash: hwid,
            ip: &ctx.ip,
            key_id: Some(key.id),
        };
        let rotating = self.tokens.issue_rotating(binding)?;
        let script_token = self.tokens.issue_session(binding)?;

        info!(ip = %ctx.ip, script = %script_id, key = %key.id, session = %session.id, "handshake opened");
        Ok(HandshakeResponse {
            success: true,
            token: rotating.token,
            script_token: script_token.token,
            handshake_token,
            salt: self.session_salt(&session.id)?,
            tracepath_session: session.id,
            expires_at: session.expires_at.timestamp(),
            token_expires: rotating.expires_at.timestamp(),
        })
    }

    fn loader_inner(
        &self,
        ctx: &RequestContext,
        script_id: &str,
        layer: u8,
        wrap: bool,
    ) -> GateResult<LayerOutput> {
        self.entry(ctx, None, "loader", &self.config.rate_limits.loader)?;
        let script = self.script(&parse_script_id(script_id)?)?;
        let mut output = self.pipeline.layer(&script, layer)?;
        if wrap {
            let frame = StreamCodec::new()
                .with_chunk_size(self.config.crypto.binary_chunk_size)?
                .encode(FrameKind::Layer, output.body.as_bytes())?;
            output.body = encode_transport(&frame);
        }
        Ok(output)
    }

    /// Runs one tracepath step. The presented rotating token is exchanged
    /// before the session advances, so a step without the current token
    /// leaves the session where it was.
    fn step(
        &self,
        ctx: &RequestContext,
        req: &StepRequest,
        step: TracepathStep,
    ) -> GateResult<(TracepathSessionRecord, StepAck)> {
        let hwid = self.hasher.hash_optional(req.hwid.as_deref())?;
        let hwid = hwid.as_deref();
        self.entry(ctx, hwid, "tracepath", &self.config.rate_limits.tracepath)?;

        let session = self.tracepath.get(&req.session_id)?;
        let successor = match req.token.as_deref() {
            Some(token) => Some(self.tokens.rotate(token, &session.script_id, hwid)?),
            None if self.config.require.rotating_token => {
                return Err(GateError::InvalidCredential("Missing token".into()));
            }
            None => None,
        };
        let advanced = self.tracepath.advance(&req.session_id, step, hwid)?;
        debug!(ip = %ctx.ip, session = %advanced.id, %step, "tracepath step");

        let ack = StepAck {
            success: true,
            next_step: step.next().map_or("done", TracepathStep::name).to_string(),
            token_expires: successor.as_ref().map(|t| t.expires_at.timestamp()),
            token: successor.map(|t| t.token),
        };
        Ok((advanced, ack))
    }

    fn validate_inner(&self, ctx: &RequestContext, req: &ValidateRequest) -> GateResult<ValidateResponse> {
        let hwid = self.hasher.hash_optional(req.hwid.as_deref())?;
        let hwid = hwid.as_deref();
        self.entry(ctx, hwid, "validate", &self.config.rate_limits.validate)?;

        let script_id = parse_script_id(&req.script_id)?;
        let now = self.clock.now();
        self.check_freshness(req, now)?;
        self.check_signature(req)?;
        self.check_replay(req)?;

        match req.handshake_token.as_deref() {
            Some(token) => {
                self.signer.verify_for(token, &script_id, hwid, now)?;
            }
            None if self.config.require.handshake_token => {
                return Err(GateError::InvalidCredential("Missing handshake token".into()));
            }
            None => {}
        }

        // the session is only committed once every other check has passed
        let session_id = match req.session_id.as_deref() {
            Some(id) => {
                let session = self.tracepath.check(id, TracepathStep::Validate, hwid)?;
                if session.script_id != script_id {
                    return Err(GateError::InvalidCredential(
                        "Credential not valid for this script".into(),
                    ));
                }
                Some(id)
            }
            None if self.config.require.tracepath => {
                return Err(GateError::SequenceViolation("tracepath not completed".into()));
            }
            None => None,
        };

        let key = self.keys.verify(&req.key, &script_id, hwid)?;
        let script = self.script(&script_id)?;

        match req.token.as_deref() {
            Some(token) => {
                let record = self.tokens.consume(token, &script_id)?;
                if let Some(bound) = record.hwid_hash.as_deref() {
                    if !hwid.is_some_and(|h| hwid_matches(bound, h)) {
                        return Err(GateError::InvalidCredential(
                            "Credential binding mismatch".into(),
                        ));
                    }
                }
            }
            None if session_id.is_some() && self.config.require.rotating_token => {
                return Err(GateError::InvalidCredential("Missing token".into()));
            }
            None => {}
        }

        let decision = self.decision.evaluate(ctx, &key, hwid, &req.report)?;
        if decision.outcome.is_ban() {
            return Err(GateError::Banned {
                reason: decision.ban_reason.unwrap_or_else(|| "banned".to_string()),
                expires_at: decision.ban_expires_at,
            });
        }

        let session_salt = match session_id {
            Some(id) => {
                self.tracepath.advance(id, TracepathStep::Validate, hwid)?;
                Some(self.session_salt(id)?)
            }
            None => None,
        };

        let key = self.keys.record_use(&key, &ctx.ip)?;
        self.store.log_request(&RequestLogEntry {
            key_id: Some(key.id),
            ip: ctx.ip.clone(),
            endpoint: "validate".to_string(),
            at: now,
        })?;

        let session_token = generate_token(SESSION_TOKEN_BYTES);
        self.store.put_delivery_session(&DeliverySession {
            token: session_token.clone(),
            key_id: key.id,
            script_id,
            hwid_hash: hwid.map(str::to_string),
            ip: ctx.ip.clone(),
            executor: ctx.executor.clone().or_else(|| req.report.executor.clone()),
            status: ConnectionStatus::Active,
            status_reason: None,
            created_at: now,
            last_heartbeat: now,
        })?;

        let mut response = ValidateResponse {
            valid: true,
            delivery_mode: req.delivery_mode,
            script: None,
            binary_stream: None,
            binary_checksum: None,
            chunked: None,
            salt: None,
            timestamp: now.timestamp(),
            session_token,
            heartbeat_interval: self.config.heartbeat.interval_secs,
            warning: decision.warning_message(),
        };
        let salt = session_salt.unwrap_or_else(|| generate_token(SALT_LEN / 2));
        self.seal(&mut response, &script, req.key.trim(), salt)?;

        info!(ip = %ctx.ip, script = %script_id, key = %key.id, mode = ?req.delivery_mode, "payload delivered");
        Ok(response)
    }

    /// Encrypts the script into `response` according to its delivery mode.
    fn seal(
        &self,
        response: &mut ValidateResponse,
        script: &ScriptRecord,
        license_key: &str,
        salt: String,
    ) -> GateResult<()> {
        let material = format!("{license_key}:{}:{}", script.id, response.timestamp);
        let source = script.source.as_bytes();
        match response.delivery_mode {
            DeliveryMode::Xor => {
                let cipher = XorCipher::new(sha256(material.as_bytes()).to_vec(), salt.as_bytes().to_vec())?;
                response.script = Some(encode_transport(&cipher.apply(source)));
                response.salt = Some(salt);
            }
            DeliveryMode::Binary => {
                let cipher = XorCipher::new(sha256(material.as_bytes()).to_vec(), salt.as_bytes().to_vec())?;
                let stream = StreamCodec::new()
                    .with_chunk_size(self.config.crypto.binary_chunk_size)?
                    .with_cipher(cipher)
                    .encode(FrameKind::Script, source)?;
                response.binary_stream = Some(encode_transport(&stream));
                response.binary_checksum = Some(rolling_checksum(source));
                response.salt = Some(salt);
            }
            DeliveryMode::Chunked => {
                let options = ChunkOptions {
                    chunk_size: self.config.crypto.aead_chunk_size,
                    kdf: KdfParams {
                        iterations: self.config.crypto.pbkdf2_iterations,
                    },
                    ..ChunkOptions::default()
                };
                let password = sha256_hex(material.as_bytes());
                response.chunked = Some(split_into_encrypted_chunks(source, &password, &options)?);
            }
        }
        Ok(())
    }

    /// Blacklist, executor and rate-limit checks shared by every endpoint.
    fn entry(
        &self,
        ctx: &RequestContext,
        hwid_hash: Option<&str>,
        endpoint: &str,
        rule: &RateRule,
    ) -> GateResult<()> {
        self.blacklist.check(Some(&ctx.ip), hwid_hash)?;
        self.check_executor(ctx)?;
        self.rate.enforce(&ctx.ip, endpoint, rule)?;
        Ok(())
    }

    fn check_executor(&self, ctx: &RequestContext) -> GateResult<()> {
        let allowed = &self.config.allowed_executors;
        if allowed.is_empty() {
            return Ok(());
        }
        let known = ctx
            .executor
            .as_deref()
            .is_some_and(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e.trim())));
        if known {
            Ok(())
        } else {
            Err(GateError::Unauthorized(format!(
                "executor {:?} not allowed",
                ctx.executor
            )))
        }
    }

    /// Nonced requests must carry a timestamp inside the skew window, so
    /// a request cannot outlive its replay marker.
    fn check_freshness(&self, req: &ValidateRequest, now: DateTime<Utc>) -> GateResult<()> {
        let nonced = req.nonce.as_deref().is_some_and(|n| !n.trim().is_empty());
        let timestamp = match req.timestamp {
            Some(t) => t,
            None if nonced => {
                return Err(GateError::InvalidRequest("nonce requires a timestamp".into()));
            }
            None => return Ok(()),
        };
        if (now.timestamp() - timestamp).abs() > self.config.clock_skew_secs {
            return Err(GateError::Expired("Request".into()));
        }
        Ok(())
    }

    fn check_signature(&self, req: &ValidateRequest) -> GateResult<()> {
        let Some(signature) = req.signature.as_deref() else {
            if self.config.require.signature {
                return Err(GateError::InvalidCredential("Missing request signature".into()));
            }
            return Ok(());
        };
        let (Some(nonce), Some(timestamp)) = (req.nonce.as_deref(), req.timestamp) else {
            return Err(GateError::InvalidRequest(
                "signed requests need a nonce and a timestamp".into(),
            ));
        };

        let data = format!(
            "{}:{}:{}:{}",
            req.script_id,
            req.hwid.as_deref().unwrap_or(""),
            nonce,
            timestamp
        );
        hmac_verify_hex(data.as_bytes(), req.key.trim().as_bytes(), signature)
            .map_err(|_| GateError::InvalidCredential("Invalid signature".into()))
    }

    fn check_replay(&self, req: &ValidateRequest) -> GateResult<()> {
        match req.nonce.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(nonce) => {
                let timestamp = req.timestamp.map(|t| t.to_string()).unwrap_or_default();
                let hash = request_hash(&[
                    req.key.trim(),
                    &req.script_id,
                    req.hwid.as_deref().unwrap_or(""),
                    nonce,
                    &timestamp,
                    req.signature.as_deref().unwrap_or(""),
                ]);
                self.replay.consume(nonce, &hash)
            }
            None if self.config.require.nonce => {
                Err(GateError::InvalidRequest("nonce is required".into()))
            }
            None => Ok(()),
        }
    }

    fn script(&self, id: &ScriptId) -> GateResult<ScriptRecord> {
        self.store
            .get_script(id)?
            .ok_or_else(|| GateError::InvalidRequest("Unknown script".into()))
    }

    fn session_salt(&self, session_id: &str) -> GateResult<String> {
        let mut salt = hmac_sign_hex(
            format!("session-salt:{session_id}").as_bytes(),
            self.config.signing_secret.as_bytes(),
        )?;
        salt.truncate(SALT_LEN);
        Ok(salt)
    }

    /// Logs rejections and records the security-relevant ones.
    fn observe<T>(&self, ctx: &RequestContext, endpoint: &str, result: GateResult<T>) -> GateResult<T> {
        let Err(e) = &result else {
            return result;
        };
        let kind = match e {
            GateError::ReplayDetected => Some(SecurityEventKind::Replay),
            GateError::InvalidCredential(_) | GateError::Unauthorized(_) => {
                Some(SecurityEventKind::InvalidCredential)
            }
            GateError::SequenceViolation(_) => Some(SecurityEventKind::SequenceViolation),
            GateError::RateLimited { .. } => Some(SecurityEventKind::RateLimited),
            _ => None,
        };
        if e.is_security_relevant() {
            warn!(ip = %ctx.ip, endpoint, executor = ?ctx.executor, error = %e, "request rejected");
        } else {
            debug!(ip = %ctx.ip, endpoint, error = %e, "request failed");
        }
        if let Some(kind) = kind {
            self.audit.record(
                kind,
                Subject {
                    ip: Some(&ctx.ip),
                    ..Subject::default()
                },
                0,
                format!("{endpoint}: {e}"),
            );
        }
        result
    }
}

fn parse_script_id(raw: &str) -> GateResult<ScriptId> {
    ScriptId::parse(raw.trim()).map_err(|_| GateError::InvalidRequest("Invalid script id".into()))
}

fn subject_of(target: &BanTarget) -> Subject<'_> {
    Subject {
        ip: target.ip.as_deref(),
        key_id: target.key_id,
        hwid_hash: target.hwid_hash.as_deref(),
    }
}
