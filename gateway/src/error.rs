//! Mapping of engine errors onto HTTP responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracegate_engine::messages::{ErrorBody, ValidateFailure};
use tracegate_types::GateError;

/// HTTP status for an engine error.
pub fn status_of(e: &GateError) -> StatusCode {
    match e {
        GateError::Unauthorized(_) | GateError::InvalidCredential(_) | GateError::Expired(_) => {
            StatusCode::UNAUTHORIZED
        }
        GateError::SequenceViolation(_) | GateError::ReplayDetected | GateError::Banned { .. } => {
            StatusCode::FORBIDDEN
        }
        GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GateError::IntegrityFailure(_) | GateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GateError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// An engine error rendered as `{ "success": false, "error": ... }`.
#[derive(Debug)]
pub struct ApiError(pub GateError);

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        respond(&self.0, Json(ErrorBody::from(&self.0)))
    }
}

/// An engine error from the validation endpoint, rendered as
/// `{ "valid": false, "message": ... }`.
#[derive(Debug)]
pub struct ValidateError(pub GateError);

impl From<GateError> for ValidateError {
    fn from(e: GateError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ValidateError {
    fn into_response(self) -> Response {
        respond(&self.0, Json(ValidateFailure::from(&self.0)))
    }
}

fn respond(e: &GateError, body: impl IntoResponse) -> Response {
    let mut response = (status_of(e), body).into_response();
    if let GateError::RateLimited { retry_after_secs } = e {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
