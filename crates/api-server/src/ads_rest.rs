//! Serving, tracking and fraud reclassification endpoints.

use crate::rest::{
    bad_request, client_ip, domain_error, user_agent, user_id, ApiError, AppState, MAX_FIELD_LEN,
};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use motorads_core::types::{
    DeviceKind, EventKind, EventSignal, Language, ListingId, Placement, PriceRange, ServeContext,
    TrackContext, UserType, ViewportMetrics,
};
use motorads_serving::ServedAd;
use motorads_tracking::{Reclassification, TrackOutcome, TrackRequest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on ads per serve, whatever the caller asks for.
const MAX_SERVE_LIMIT: usize = 10;

/// Maximum tracking token length.
const MAX_TOKEN_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
pub struct ServeQuery {
    pub placement: Placement,
    pub session_id: String,
    pub position: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub user_type: Option<UserType>,
    pub language: Option<Language>,
    pub device: Option<DeviceKind>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub listing_id: Option<ListingId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ServeResponse {
    pub ads: Vec<ServedAd>,
}

fn validate_serve_query(query: &ServeQuery) -> Result<(), &'static str> {
    if query.session_id.is_empty() {
        return Err("'session_id' must not be empty");
    }
    if query.session_id.len() > MAX_FIELD_LEN {
        return Err("'session_id' exceeds maximum length");
    }
    let too_long = [&query.position, &query.city, &query.region, &query.make, &query.model]
        .into_iter()
        .flatten()
        .any(|v| v.len() > MAX_FIELD_LEN);
    if too_long {
        return Err("a filter value exceeds maximum length");
    }
    if let (Some(min), Some(max)) = (query.price_min, query.price_max) {
        if min > max {
            return Err("'price_min' must not exceed 'price_max'");
        }
    }
    if query.price_min.is_some_and(|p| p < 0.0) || query.price_max.is_some_and(|p| p < 0.0) {
        return Err("prices must be non-negative");
    }
    Ok(())
}

/// GET /v1/ads/serve: Sponsored listings for one placement.
pub async fn handle_serve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ServeQuery>,
) -> Result<Json<ServeResponse>, ApiError> {
    validate_serve_query(&query).map_err(|msg| bad_request("invalid_serve_request", msg))?;

    let limit = query
        .limit
        .unwrap_or_else(|| state.serving.slots_for(query.placement))
        .min(MAX_SERVE_LIMIT);

    let mut ctx = ServeContext::new(query.placement, query.session_id);
    ctx.user_id = user_id(&headers);
    ctx.position = query.position;
    ctx.city = query.city;
    ctx.region = query.region;
    ctx.user_type = query.user_type;
    ctx.language = query.language;
    ctx.device = query.device;
    ctx.search_make = query.make;
    ctx.search_model = query.model;
    ctx.price_range = match (query.price_min, query.price_max) {
        (None, None) => None,
        (min, max) => Some(PriceRange {
            min: min.unwrap_or(0.0),
            max: max.unwrap_or(f64::MAX),
        }),
    };
    ctx.current_listing_id = query.listing_id;

    let ads = state.serving.serve(&ctx, limit).await;
    Ok(Json(ServeResponse { ads }))
}

#[derive(Debug, Deserialize)]
pub struct TrackBody {
    pub tracking_token: String,
    pub event_type: EventKind,
    pub session_id: String,
    #[serde(default)]
    pub viewport_seconds: f64,
    #[serde(default)]
    pub visible_ratio: f64,
    pub position: Option<String>,
}

fn validate_track_body(body: &TrackBody) -> Result<(), &'static str> {
    if body.tracking_token.is_empty() {
        return Err("'tracking_token' must not be empty");
    }
    if body.tracking_token.len() > MAX_TOKEN_LEN {
        return Err("'tracking_token' exceeds maximum length");
    }
    if body.session_id.is_empty() {
        return Err("'session_id' must not be empty");
    }
    if body.session_id.len() > MAX_FIELD_LEN {
        return Err("'session_id' exceeds maximum length");
    }
    if !body.viewport_seconds.is_finite() || !body.visible_ratio.is_finite() {
        return Err("viewport metrics must be finite numbers");
    }
    Ok(())
}

/// POST /v1/ads/track: Record an impression, click or lead.
///
/// Fraud and budget outcomes come back as `ok: false` with a 200.
pub async fn handle_track(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TrackBody>,
) -> Result<Json<TrackOutcome>, ApiError> {
    validate_track_body(&body).map_err(|msg| bad_request("invalid_track_request", msg))?;

    let signal = match body.event_type {
        EventKind::Impression => EventSignal::Impression(ViewportMetrics {
            viewport_seconds: body.viewport_seconds,
            visible_ratio: body.visible_ratio,
        }),
        EventKind::Click => EventSignal::Click,
        EventKind::Lead => EventSignal::Lead,
    };
    let request = TrackRequest {
        tracking_token: body.tracking_token,
        signal,
        context: TrackContext {
            session_id: body.session_id,
            user_id: user_id(&headers),
            ip: client_ip(&headers),
            user_agent: user_agent(&headers),
            position: body.position,
        },
    };
    Ok(Json(state.tracking.track(&request).await))
}

#[derive(Debug, Deserialize)]
pub struct FraudBody {
    #[serde(default = "default_fraud_reason")]
    pub reason: String,
}

fn default_fraud_reason() -> String {
    "fraud_detection".to_string()
}

/// POST /v1/ads/events/:id/fraud: Reclassify an event as fraudulent.
pub async fn handle_mark_fraudulent(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(body): Json<FraudBody>,
) -> Result<Json<Reclassification>, ApiError> {
    if body.reason.is_empty() || body.reason.len() > MAX_FIELD_LEN {
        return Err(bad_request(
            "invalid_fraud_request",
            "'reason' must be 1-256 characters",
        ));
    }
    state
        .tracking
        .mark_fraudulent(event_id, &body.reason)
        .map(Json)
        .map_err(domain_error)
}
