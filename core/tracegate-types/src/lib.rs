//! Core type definitions for Tracegate.
//!
//! This crate defines the types shared by every layer of the delivery
//! protocol:
//! - Script and key identifiers (UUID v7)
//! - An injectable wall clock
//! - The persisted records (keys, bans, sessions, tokens, audit events)
//! - The gate error taxonomy returned to protocol entry points

mod clock;
mod error;
mod ids;
mod records;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GateError, GateResult};
pub use ids::{KeyId, ScriptId};
pub use records::{
    BlacklistEntry, CachedLayer, ConnectionStatus, DeliverySession, LicenseKeyRecord,
    RateWindow, RequestLogEntry, RotatingTokenRecord, ScriptRecord, SecurityEvent,
    SecurityEventKind, TokenKind, TracepathSessionRecord, TRACEPATH_STATES,
};
