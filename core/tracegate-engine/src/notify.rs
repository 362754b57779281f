//! Fire-and-forget security event webhook.

use serde::Serialize;
use std::time::Duration;
use tracegate_types::SecurityEvent;
use tracing::{debug, warn};

#[derive(Serialize)]
struct WebhookBody<'a> {
    source: &'static str,
    event: &'a SecurityEvent,
}

/// Posts security events to an optional webhook without blocking the
/// caller.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: Option<String>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.filter(|u| !u.trim().is_empty()),
            timeout,
        }
    }

    /// A notifier that drops everything.
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(1))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Spawns delivery of `event` on the current runtime. Failures are
    /// logged and swallowed.
    pub fn notify(&self, event: &SecurityEvent) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(kind = %event.kind, "no runtime, webhook notification dropped");
            return;
        };
        let body = match serde_json::to_value(WebhookBody {
            source: "tracegate",
            event,
        }) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to encode webhook body: {e}");
                return;
            }
        };

        let request = self.client.post(url).timeout(self.timeout).json(&body);
        let kind = event.kind;
        handle.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%kind, "webhook delivered");
                }
                Ok(resp) => warn!(%kind, status = %resp.status(), "webhook rejected"),
                Err(e) => warn!(%kind, "webhook failed: {e}"),
            }
        });
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("enabled", &self.is_enabled())
            .field("timeout", &self.timeout)
            .finish()
    }
}
