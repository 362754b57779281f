//! Delivery session liveness.
//!
//! The server recomputes a session's fate on every call and answers with
//! directives; the client never decides its own status.

use crate::config::HeartbeatConfig;
use crate::context::{ClientReport, RequestContext};
use crate::decision::DecisionEngine;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracegate_guard::Blacklist;
use tracegate_store::GateStore;
use tracegate_types::{Clock, ConnectionStatus, DeliverySession, GateError, GateResult};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatAction {
    /// First call after validation.
    Register,
    /// Periodic liveness, optionally with telemetry.
    Ping,
    /// Status check without stamping a heartbeat.
    Validate,
    /// Client is shutting the session down.
    Kill,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub action: HeartbeatAction,
    #[serde(default, flatten)]
    pub report: ClientReport,
}

/// Directives for the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub alive: bool,
    pub status: ConnectionStatus,
    pub banned: bool,
    pub kicked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_warning: Option<String>,
    /// Seconds until the next expected heartbeat.
    #[serde(rename = "nextHeartbeat")]
    pub next_heartbeat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct HeartbeatService {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    blacklist: Arc<Blacklist>,
    decision: Arc<DecisionEngine>,
    config: HeartbeatConfig,
}

impl HeartbeatService {
    pub fn new(
        store: Arc<dyn GateStore>,
        clock: Arc<dyn Clock>,
        blacklist: Arc<Blacklist>,
        decision: Arc<DecisionEngine>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            store,
            clock,
            blacklist,
            decision,
            config,
        }
    }

    pub fn handle(
        &self,
        ctx: &RequestContext,
        session_token: &str,
        request: &HeartbeatRequest,
    ) -> GateResult<HeartbeatResponse> {
        let now = self.clock.now();
        let session = self
            .store
            .get_delivery_session(session_token)?
            .ok_or_else(GateError::session_expired)?;

        match session.status {
            ConnectionStatus::Active => {}
            ConnectionStatus::Disconnected => return Err(GateError::session_expired()),
            ConnectionStatus::Kicked | ConnectionStatus::Banned => {
                return Ok(self.directive(&session, None));
            }
        }

        if let Some(entry) = self
            .blacklist
            .is_blacklisted(Some(&session.ip), session.hwid_hash.as_deref())?
        {
            return self.close(session, ConnectionStatus::Banned, &entry.reason);
        }

        let Some(key) = self.store.get_key_by_id(&session.key_id)? else {
            self.close(session, ConnectionStatus::Disconnected, "key removed")?;
            return Err(GateError::InvalidCredential("Invalid key".into()));
        };
        if key.ban_active(now) {
            let reason = key.ban_reason.clone().unwrap_or_else(|| "banned".to_string());
            return self.close(session, ConnectionStatus::Banned, &reason);
        }

        let timeout = Duration::seconds(i64::try_from(self.config.timeout_secs).unwrap_or(i64::MAX));
        if now - session.last_heartbeat > timeout {
            self.close(session, ConnectionStatus::Disconnected, "heartbeat timeout")?;
            return Err(GateError::session_expired());
        }

        match request.action {
            HeartbeatAction::Validate => Ok(self.directive(&session, None)),
            HeartbeatAction::Register => {
                self.store.touch_delivery_session(&session.token, now)?;
                debug!(key = %session.key_id, "heartbeat registered");
                Ok(self.directive(&session, None))
            }
            HeartbeatAction::Kill => {
                self.close(session, ConnectionStatus::Disconnected, "client disconnect")
            }
            HeartbeatAction::Ping => {
                self.store.touch_delivery_session(&session.token, now)?;
                if request.report.is_empty() {
                    return Ok(self.directive(&session, None));
                }
                let decision = self.decision.evaluate(
                    ctx,
                    &key,
                    session.hwid_hash.as_deref(),
                    &request.report,
                )?;
                if decision.outcome.is_ban() {
                    let reason = decision.ban_reason.unwrap_or_else(|| "banned".to_string());
                    return self.close(session, ConnectionStatus::Banned, &reason);
                }
                Ok(self.directive(&session, decision.warning_message()))
            }
        }
    }

    fn close(
        &self,
        mut session: DeliverySession,
        status: ConnectionStatus,
        reason: &str,
    ) -> GateResult<HeartbeatResponse> {
        self.store
            .update_delivery_status(&session.token, status, Some(reason))?;
        info!(key = %session.key_id, %status, reason, "delivery session closed");
        session.status = status;
        session.status_reason = Some(reason.to_string());
        Ok(self.directive(&session, None))
    }

    fn directive(&self, session: &DeliverySession, show_warning: Option<String>) -> HeartbeatResponse {
        let alive = session.status == ConnectionStatus::Active;
        HeartbeatResponse {
            success: true,
            alive,
            status: session.status,
            banned: session.status == ConnectionStatus::Banned,
            kicked: session.status == ConnectionStatus::Kicked,
            show_warning,
            next_heartbeat: if alive { self.config.interval_secs } else { 0 },
            reason: session.status_reason.clone(),
        }
    }
}
