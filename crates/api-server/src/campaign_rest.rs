//! Campaign lifecycle endpoints.

use crate::rest::{domain_error, ApiError, AppState};
use axum::extract::{Path, State};
use axum::Json;
use motorads_core::types::Campaign;
use uuid::Uuid;

/// POST /v1/campaigns/:id/submit: Draft → pending review.
pub async fn handle_submit(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    state.campaigns.submit(campaign_id).map(Json).map_err(domain_error)
}

/// POST /v1/campaigns/:id/pause: Active → paused.
pub async fn handle_pause(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    state.campaigns.pause(campaign_id).map(Json).map_err(domain_error)
}

/// POST /v1/campaigns/:id/resume: Paused or budget-exhausted → active.
pub async fn handle_resume(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    state.campaigns.resume(campaign_id).map(Json).map_err(domain_error)
}
