//! The ordered handshake state machine.
//!
//! ```text
//! 0:init -> 1:version -> 2:info -> 3:endpoints -> 4:flags -> 5:validate
//! ```
//!
//! Step `k` runs only if the session's last completed step is `k - 1`.
//! A rejected call leaves the session untouched. Completing the terminal
//! step consumes the session.

use crate::error::{LicenseError, LicenseResult};
use crate::hwid::hwid_matches;
use chrono::Duration;
use std::fmt;
use std::sync::Arc;
use tracegate_crypto::generate_token;
use tracegate_store::GateStore;
use tracegate_types::{Clock, ScriptId, TracepathSessionRecord, TRACEPATH_STATES};
use tracing::{debug, warn};

/// Default tracepath session lifetime in seconds.
pub const DEFAULT_TRACEPATH_TTL_SECS: i64 = 120;

const SESSION_ID_BYTES: usize = 16;

/// One state of the tracepath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TracepathStep {
    Init = 0,
    Version = 1,
    Info = 2,
    Endpoints = 3,
    Flags = 4,
    Validate = 5,
}

impl TracepathStep {
    /// Every step in order.
    pub const ALL: [Self; TRACEPATH_STATES] = [
        Self::Init,
        Self::Version,
        Self::Info,
        Self::Endpoints,
        Self::Flags,
        Self::Validate,
    ];

    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// The step that must be complete before this one may run.
    #[must_use]
    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Validate
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Version => "version",
            Self::Info => "info",
            Self::Endpoints => "endpoints",
            Self::Flags => "flags",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for TracepathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creates and advances tracepath sessions.
pub struct Tracepath {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Tracepath {
    pub fn new(store: Arc<dyn GateStore>, clock: Arc<dyn Clock>, ttl_secs: i64) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    /// Opens a session for `script_id` and completes the `version` step.
    pub fn start(
        &self,
        script_id: ScriptId,
        hwid_hash: Option<&str>,
    ) -> LicenseResult<TracepathSessionRecord> {
        let now = self.clock.now();
        let mut step_completed_at = [None; TRACEPATH_STATES];
        step_completed_at[usize::from(TracepathStep::Init.index())] = Some(now);

        let session = TracepathSessionRecord {
            id: generate_token(SESSION_ID_BYTES),
            script_id,
            hwid_hash: hwid_hash.map(str::to_string),
            current_step: TracepathStep::Init.index(),
            step_completed_at,
            valid: true,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.store.put_tracepath(&session)?;
        self.advance(&session.id, TracepathStep::Version, hwid_hash)
    }

    /// Runs `step` for session `id`.
    ///
    /// Unknown or expired sessions fail with `Expired`; a consumed session
    /// or a step whose predecessor is not the last completed step fails
    /// with `SequenceViolation`. Neither mutates the session.
    pub fn advance(
        &self,
        id: &str,
        step: TracepathStep,
        hwid_hash: Option<&str>,
    ) -> LicenseResult<TracepathSessionRecord> {
        let previous = self.check(id, step, hwid_hash)?;
        let advanced = self
            .store
            .advance_tracepath(
                id,
                previous.current_step,
                step.index(),
                self.clock.now(),
                step.is_terminal(),
            )?
            .ok_or_else(|| LicenseError::SequenceViolation {
                expected: step.to_string(),
                found: format!("{step} (concurrent)"),
            })?;
        debug!(session = id, %step, "tracepath advanced");
        Ok(advanced)
    }

    /// Checks that `step` may run next for session `id` without running
    /// it. Fails exactly as [`Tracepath::advance`] would.
    pub fn check(
        &self,
        id: &str,
        step: TracepathStep,
        hwid_hash: Option<&str>,
    ) -> LicenseResult<TracepathSessionRecord> {
        let Some(previous) = step.previous() else {
            return Err(LicenseError::SequenceViolation {
                expected: "version".to_string(),
                found: step.to_string(),
            });
        };

        let session = self.get(id)?;

        if let Some(bound) = session.hwid_hash.as_deref() {
            if !hwid_hash.is_some_and(|h| hwid_matches(bound, h)) {
                warn!(session = id, %step, "tracepath hwid mismatch");
                return Err(LicenseError::BindingMismatch("hwid"));
            }
        }

        let expected = TracepathStep::from_index(session.current_step).and_then(TracepathStep::next);
        if !session.valid || session.current_step != previous.index() {
            warn!(session = id, %step, current = session.current_step, valid = session.valid, "tracepath sequence violation");
            return Err(LicenseError::SequenceViolation {
                expected: expected.map_or_else(|| "none".to_string(), |s| s.to_string()),
                found: step.to_string(),
            });
        }
        Ok(session)
    }

    /// Peeks at a live session without advancing it.
    pub fn get(&self, id: &str) -> LicenseResult<TracepathSessionRecord> {
        self.store
            .get_tracepath(id, self.clock.now())?
            .ok_or(LicenseError::Expired("Session"))
    }

    /// Marks a session unusable.
    pub fn invalidate(&self, id: &str) -> LicenseResult<()> {
        Ok(self.store.invalidate_tracepath(id)?)
    }
}
