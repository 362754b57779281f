//! Per-request inputs.

use serde::{Deserialize, Serialize};

/// Request metadata taken from the transport, never from the body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestContext {
    /// Client address.
    pub ip: String,
    pub user_agent: Option<String>,
    /// Executor identity from the trusted executor header.
    pub executor: Option<String>,
}

impl RequestContext {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = Some(executor.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Telemetry the client reports about itself. Untrusted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientReport {
    /// Tools the client claims to have detected in its environment.
    pub detected_tools: Vec<String>,
    /// Executor the client claims to run under.
    pub executor: Option<String>,
}

impl ClientReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detected_tools.is_empty() && self.executor.is_none()
    }
}
