//! HTTP API for Tracegate.
//!
//! Thin axum handlers over [`Gate`]. Every handler extracts the transport
//! context, runs the gate call on the blocking pool under the configured
//! store budget and maps the outcome onto a status code and JSON body.

pub mod client;
pub mod error;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use client::{ClientContext, SessionToken, StepHeaders};
use error::{ApiError, ValidateError};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracegate_engine::messages::{
    EndpointsResponse, FlagsResponse, HandshakeRequest, HandshakeResponse, InfoResponse,
    ValidateRequest, ValidateResponse,
};
use tracegate_engine::{run_bounded, Gate, HeartbeatRequest, HeartbeatResponse, LOADER_PATH};
use tracegate_types::GateError;

/// Cache policy for persisted loader layers.
pub const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";
pub const LAYER_VERSION_HEADER: &str = "x-layer-version";

/// Shared handler state.
pub struct AppState {
    pub gate: Arc<Gate>,
    /// Deadline for each gate call.
    pub budget: Duration,
}

impl AppState {
    pub fn new(gate: Gate) -> Self {
        let budget = gate.config().store_budget();
        Self {
            gate: Arc::new(gate),
            budget,
        }
    }
}

/// Build the HTTP API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/handshake", post(handshake))
        .route("/api/v1/tracepath/info", post(tracepath_info))
        .route("/api/v1/tracepath/endpoints", post(tracepath_endpoints))
        .route("/api/v1/tracepath/flags", post(tracepath_flags))
        .route("/api/v1/validate", post(validate))
        .route("/api/v1/heartbeat", post(heartbeat))
        .route(&format!("{LOADER_PATH}/{{script_id}}"), get(loader))
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` resolves. Peer addresses
/// are exposed to the handlers.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handshake(
    State(state): State<Arc<AppState>>,
    ClientContext(ctx): ClientContext,
    body: Result<Json<HandshakeRequest>, JsonRejection>,
) -> Result<Json<HandshakeResponse>, ApiError> {
    let Json(req) = body.map_err(malformed)?;
    let gate = state.gate.clone();
    let resp = run_bounded(state.budget, move || gate.handshake(&ctx, &req)).await?;
    Ok(Json(resp))
}

async fn tracepath_info(
    State(state): State<Arc<AppState>>,
    ClientContext(ctx): ClientContext,
    StepHeaders(step): StepHeaders,
) -> Result<Json<InfoResponse>, ApiError> {
    let gate = state.gate.clone();
    let resp = run_bounded(state.budget, move || gate.tracepath_info(&ctx, &step)).await?;
    Ok(Json(resp))
}

async fn tracepath_endpoints(
    State(state): State<Arc<AppState>>,
    ClientContext(ctx): ClientContext,
    StepHeaders(step): StepHeaders,
) -> Result<Json<EndpointsResponse>, ApiError> {
    let gate = state.gate.clone();
    let resp = run_bounded(state.budget, move || gate.tracepath_endpoints(&ctx, &step)).await?;
    Ok(Json(resp))
}

async fn tracepath_flags(
    State(state): State<Arc<AppState>>,
    ClientContext(ctx): ClientContext,
    StepHeaders(step): StepHeaders,
) -> Result<Json<FlagsResponse>, ApiError> {
    let gate = state.gate.clone();
    let resp = run_bounded(state.budget, move || gate.tracepath_flags(&ctx, &step)).await?;
    Ok(Json(resp))
}

async fn validate(
    State(state): State<Arc<AppState>>,
    ClientContext(ctx): ClientContext,
    body: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, ValidateError> {
    let Json(req) = body.map_err(malformed)?;
    let gate = state.gate.clone();
    let resp = run_bounded(state.budget, move || gate.validate(&ctx, &req)).await?;
    Ok(Json(resp))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    ClientContext(ctx): ClientContext,
    SessionToken(token): SessionToken,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let Json(req) = body.map_err(malformed)?;
    let gate = state.gate.clone();
    let resp = run_bounded(state.budget, move || gate.heartbeat(&ctx, &token, &req)).await?;
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
struct LoaderQuery {
    #[serde(default = "first_layer")]
    layer: u8,
    #[serde(default)]
    wrap: bool,
}

fn first_layer() -> u8 {
    1
}

async fn loader(
    State(state): State<Arc<AppState>>,
    ClientContext(ctx): ClientContext,
    Path(script_id): Path<String>,
    query: Result<Query<LoaderQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| GateError::InvalidRequest(e.body_text()))?;
    let gate = state.gate.clone();
    let output = run_bounded(state.budget, move || {
        gate.loader_layer(&ctx, &script_id, query.layer, query.wrap)
    })
    .await?;

    let cache = if output.persisted {
        IMMUTABLE_CACHE
    } else {
        "no-store"
    };
    let mut response = output.body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache));
    if let Ok(version) = HeaderValue::from_str(&output.version) {
        headers.insert(HeaderName::from_static(LAYER_VERSION_HEADER), version);
    }
    Ok(response)
}

fn malformed(e: JsonRejection) -> GateError {
    GateError::InvalidRequest(e.body_text())
}
