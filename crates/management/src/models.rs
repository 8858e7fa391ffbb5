//! Request types for the campaign lifecycle service.

use chrono::{DateTime, Utc};
use motorads_core::types::{CampaignObjective, ListingId, PricingModel};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaignRequest {
    pub account_id: Uuid,
    pub name: String,
    #[serde(default = "default_objective")]
    pub objective: CampaignObjective,
    #[serde(default = "default_pricing_model")]
    pub pricing_model: PricingModel,
    pub daily_budget: f64,
    #[serde(default)]
    pub total_budget: Option<f64>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    /// Raw targeting document; validated and normalized on create.
    #[serde(default = "default_targeting")]
    pub targeting: serde_json::Value,
}

fn default_objective() -> CampaignObjective {
    CampaignObjective::Traffic
}

fn default_pricing_model() -> PricingModel {
    PricingModel::Cpc
}

fn default_targeting() -> serde_json::Value {
    serde_json::json!({ "version": 1 })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub objective: Option<CampaignObjective>,
    pub pricing_model: Option<PricingModel>,
    pub daily_budget: Option<f64>,
    pub total_budget: Option<f64>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub targeting: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCreativeRequest {
    pub listing_id: ListingId,
    pub headline: Option<String>,
    pub subtitle: Option<String>,
    pub cta: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCreativeRequest {
    pub listing_id: Option<ListingId>,
    pub headline: Option<String>,
    pub subtitle: Option<String>,
    pub cta: Option<String>,
}
