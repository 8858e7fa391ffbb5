//! Shared REST state, error mapping, request-header helpers and the
//! operational endpoints.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use motorads_billing::WalletLedger;
use motorads_core::AdsError;
use motorads_management::CampaignService;
use motorads_serving::ServingOrchestrator;
use motorads_tracking::TrackingOrchestrator;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Maximum string field length (session id, user id, reasons, ...).
pub const MAX_FIELD_LEN: usize = 256;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub serving: Arc<ServingOrchestrator>,
    pub tracking: Arc<TrackingOrchestrator>,
    pub ledger: Arc<WalletLedger>,
    pub campaigns: Arc<CampaignService>,
    pub node_id: String,
    pub start_time: Instant,
    /// Flipped by the binary once start-up wiring has finished.
    pub ready: Arc<AtomicBool>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn bad_request(error: &str, message: impl Into<String>) -> ApiError {
    metrics::counter!("api.validation_errors").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Map a domain error onto an HTTP status. Internal details stay in the log.
pub fn domain_error(e: AdsError) -> ApiError {
    let (status, code) = match &e {
        AdsError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        AdsError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
        AdsError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        AdsError::NotEditable(_) => (StatusCode::CONFLICT, "not_editable"),
        AdsError::Store(_) => (StatusCode::CONFLICT, "store_conflict"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "Request failed");
        metrics::counter!("api.errors").increment(1);
        "Internal processing error".to_string()
    } else {
        e.to_string()
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message,
        }),
    )
}

/// Authenticated user id, set by the upstream gateway.
pub fn user_id(headers: &HeaderMap) -> Option<String> {
    header_str(headers, USER_ID_HEADER)
        .filter(|v| !v.is_empty() && v.len() <= MAX_FIELD_LEN)
        .map(String::from)
}

/// Left-most address of `x-forwarded-for`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    header_str(headers, axum::http::header::USER_AGENT.as_str()).map(String::from)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

// ─── Operational endpoints ──────────────────────────────────────────────

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness probe.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.ready.load(Ordering::Acquire) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}
