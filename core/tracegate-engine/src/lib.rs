//! The Tracegate protocol engine.
//!
//! [`Gate`] wires the guard, license and protocol crates together behind
//! one method per endpoint:
//!
//! ```text
//! handshake -> tracepath info -> endpoints -> flags -> validate -> heartbeat
//!                                                   \-> loader layers 1..=7
//! ```
//!
//! Supporting pieces:
//! - [`GateConfig`]: TOML configuration with validated defaults
//! - [`DecisionEngine`]: threat scoring, warnings and automatic bans
//! - [`Pipeline`]: the layered loader with per-version caching
//! - [`HeartbeatService`]: server-decided session liveness
//! - [`Notifier`]: fire-and-forget webhook for security events

mod audit;
pub mod config;
mod context;
mod decision;
mod gate;
mod heartbeat;
pub mod messages;
mod notify;
mod pipeline;

pub use audit::{Audit, Subject};
pub use config::{
    ConfigError, ConfigResult, CryptoConfig, DecisionConfig, GateConfig, HeartbeatConfig,
    ProtectionFlags, RateLimits, Requirements, WebhookConfig, MAX_STORE_BUDGET_MS,
};
pub use context::{ClientReport, RequestContext};
pub use decision::{Decision, DecisionEngine, DecisionOutcome};
pub use gate::{run_bounded, BanTarget, Gate, MaintenanceReport};
pub use heartbeat::{HeartbeatAction, HeartbeatRequest, HeartbeatResponse, HeartbeatService};
pub use messages::DeliveryMode;
pub use notify::Notifier;
pub use pipeline::{
    DefaultTemplates, LayerOutput, LayerParams, LayerTemplate, Pipeline, FILLER_LEN, LAYER_COUNT,
    LOADER_PATH,
};
