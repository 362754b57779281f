//! Request metadata extractors.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracegate_engine::messages::StepRequest;
use tracegate_engine::RequestContext;
use tracegate_types::GateError;

pub const EXECUTOR_HEADER: &str = "x-executor";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const HWID_HEADER: &str = "x-hwid";
pub const ROTATING_TOKEN_HEADER: &str = "x-rotating-token";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

const UNKNOWN_PEER: &str = "unknown";

/// Transport-derived [`RequestContext`].
///
/// The client address is the socket peer unless proxy headers are
/// trusted, in which case the first `X-Forwarded-For` entry wins.
#[derive(Debug, Clone)]
pub struct ClientContext(pub RequestContext);

impl FromRequestParts<Arc<AppState>> for ClientContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let forwarded = state
            .gate
            .config()
            .trust_proxy_headers
            .then(|| forwarded_for(&parts.headers))
            .flatten();
        let ip = forwarded
            .or(peer)
            .map_or_else(|| UNKNOWN_PEER.to_string(), |ip| ip.to_string());

        let mut ctx = RequestContext::new(ip);
        ctx.executor = header_str(&parts.headers, EXECUTOR_HEADER);
        ctx.user_agent = header_str(&parts.headers, header::USER_AGENT.as_str());
        Ok(Self(ctx))
    }
}

/// Tracepath step inputs carried in headers.
#[derive(Debug, Clone)]
pub struct StepHeaders(pub StepRequest);

impl<S: Send + Sync> FromRequestParts<S> for StepHeaders {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session_id = header_str(&parts.headers, SESSION_ID_HEADER).ok_or_else(|| {
            ApiError(GateError::InvalidRequest("missing tracepath session".into()))
        })?;
        Ok(Self(StepRequest {
            session_id,
            hwid: header_str(&parts.headers, HWID_HEADER),
            token: header_str(&parts.headers, ROTATING_TOKEN_HEADER),
        }))
    }
}

/// The delivery session token presented to the heartbeat endpoint.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for SessionToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_str(&parts.headers, SESSION_TOKEN_HEADER)
            .map(Self)
            .ok_or_else(|| ApiError(GateError::Unauthorized("missing session token".into())))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    header_str(headers, FORWARDED_FOR_HEADER)?
        .split(',')
        .next()
        .and_then(|first| first.trim().parse().ok())
}
