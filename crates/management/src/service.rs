//! Campaign lifecycle service: creation, draft edits, creative review and
//! the status transitions of the campaign state machine.

use crate::models::{
    CreateCampaignRequest, CreateCreativeRequest, UpdateCampaignRequest, UpdateCreativeRequest,
};
use chrono::Utc;
use motorads_core::config::AdsConfig;
use motorads_core::lifecycle;
use motorads_core::targeting::{self, TargetingSpec};
use motorads_core::types::{Campaign, CampaignStatus, Creative, CreativeStatus};
use motorads_core::{AdsError, AdsResult};
use motorads_store::{AdStore, StoreError};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct CampaignService {
    store: Arc<dyn AdStore>,
    min_daily_budget: f64,
    resume_threshold: f64,
}

impl CampaignService {
    pub fn new(store: Arc<dyn AdStore>, config: &AdsConfig) -> Self {
        info!(
            min_daily_budget = config.min_daily_budget,
            resume_threshold = config.budget.resume_threshold,
            "Campaign service initialized"
        );
        Self {
            store,
            min_daily_budget: config.min_daily_budget,
            resume_threshold: config.budget.resume_threshold,
        }
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn get_campaign(&self, id: Uuid) -> AdsResult<Campaign> {
        self.store
            .get_campaign(id)
            .ok_or_else(|| AdsError::not_found("campaign", id))
    }

    pub fn list_campaigns(&self, account_id: Option<Uuid>) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self
            .store
            .list_campaigns()
            .into_iter()
            .filter(|c| account_id.map_or(true, |a| c.account_id == a))
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    pub fn creatives(&self, campaign_id: Uuid) -> AdsResult<Vec<Creative>> {
        self.get_campaign(campaign_id)?;
        Ok(self.store.creatives_for_campaign(campaign_id))
    }

    // ─── Create & edit ──────────────────────────────────────────────────

    pub fn create_campaign(&self, req: CreateCampaignRequest) -> AdsResult<Campaign> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AdsError::Validation("name is required".into()));
        }
        self.check_budgets(req.daily_budget, req.total_budget)?;
        check_window(&req.start_at, &req.end_at)?;
        let targeting = parse_targeting(&req.targeting)?;

        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            account_id: req.account_id,
            name: name.to_string(),
            objective: req.objective,
            pricing_model: req.pricing_model,
            status: CampaignStatus::Draft,
            daily_budget: req.daily_budget,
            daily_spent: 0.0,
            total_budget: req.total_budget,
            total_spent: 0.0,
            start_at: req.start_at,
            end_at: req.end_at,
            targeting,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_campaign(campaign.clone())?;

        metrics::counter!("campaign.created").increment(1);
        info!(campaign_id = %campaign.id, account_id = %campaign.account_id, "Campaign created");
        Ok(campaign)
    }

    /// Edit a draft. Any other status rejects the edit.
    pub fn update_campaign(&self, id: Uuid, req: UpdateCampaignRequest) -> AdsResult<Campaign> {
        let current = self.get_campaign(id)?;
        if !current.status.is_editable() {
            return Err(AdsError::NotEditable(current.status));
        }

        let daily_budget = req.daily_budget.unwrap_or(current.daily_budget);
        let total_budget = req.total_budget.or(current.total_budget);
        self.check_budgets(daily_budget, total_budget)?;
        let start_at = req.start_at.or(current.start_at);
        let end_at = req.end_at.or(current.end_at);
        check_window(&start_at, &end_at)?;
        let targeting = req.targeting.as_ref().map(parse_targeting).transpose()?;
        if let Some(name) = &req.name {
            if name.trim().is_empty() {
                return Err(AdsError::Validation("name is required".into()));
            }
        }

        let updated = self.apply(id, |c| {
            if !c.status.is_editable() {
                return Err(AdsError::NotEditable(c.status));
            }
            if let Some(name) = &req.name {
                c.name = name.trim().to_string();
            }
            if let Some(objective) = req.objective {
                c.objective = objective;
            }
            if let Some(pricing_model) = req.pricing_model {
                c.pricing_model = pricing_model;
            }
            c.daily_budget = daily_budget;
            c.total_budget = total_budget;
            c.start_at = start_at;
            c.end_at = end_at;
            if let Some(targeting) = &targeting {
                c.targeting = targeting.clone();
            }
            Ok(())
        })?;
        info!(campaign_id = %id, "Campaign updated");
        Ok(updated)
    }

    pub fn add_creative(&self, campaign_id: Uuid, req: CreateCreativeRequest) -> AdsResult<Creative> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.status.is_terminal() {
            return Err(AdsError::NotEditable(campaign.status));
        }
        let now = Utc::now();
        let creative = Creative {
            id: Uuid::new_v4(),
            campaign_id,
            listing_id: req.listing_id,
            headline: req.headline,
            subtitle: req.subtitle,
            cta: req.cta,
            status: CreativeStatus::Pending,
            rejected_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_creative(creative.clone())?;
        info!(creative_id = %creative.id, campaign_id = %campaign_id, "Creative added");
        Ok(creative)
    }

    /// Edit a creative's overrides. An approved creative goes back to
    /// pending review.
    pub fn update_creative(&self, id: Uuid, req: UpdateCreativeRequest) -> AdsResult<Creative> {
        let creative = self
            .store
            .get_creative(id)
            .ok_or_else(|| AdsError::not_found("creative", id))?;
        let campaign = self.get_campaign(creative.campaign_id)?;
        if campaign.status.is_terminal() {
            return Err(AdsError::NotEditable(campaign.status));
        }

        let updated = self.store.update_creative(id, &mut |c| {
            if let Some(listing_id) = req.listing_id {
                c.listing_id = listing_id;
            }
            if req.headline.is_some() {
                c.headline = req.headline.clone();
            }
            if req.subtitle.is_some() {
                c.subtitle = req.subtitle.clone();
            }
            if req.cta.is_some() {
                c.cta = req.cta.clone();
            }
            if c.status == CreativeStatus::Approved {
                c.status = CreativeStatus::Pending;
            }
            c.updated_at = Utc::now();
            Ok(())
        })?;
        if creative.status == CreativeStatus::Approved {
            info!(creative_id = %id, "Approved creative edited, back to pending review");
        }
        Ok(updated)
    }

    pub fn approve_creative(&self, id: Uuid) -> AdsResult<Creative> {
        self.review_creative(id, CreativeStatus::Approved, None)
    }

    pub fn reject_creative(&self, id: Uuid, reason: &str) -> AdsResult<Creative> {
        self.review_creative(id, CreativeStatus::Rejected, Some(reason.to_string()))
    }

    fn review_creative(
        &self,
        id: Uuid,
        status: CreativeStatus,
        reason: Option<String>,
    ) -> AdsResult<Creative> {
        let creative = self.store.update_creative(id, &mut |c| {
            c.status = status;
            c.rejected_reason = reason.clone();
            c.updated_at = Utc::now();
            Ok(())
        })?;
        info!(creative_id = %id, status = ?status, "Creative reviewed");
        Ok(creative)
    }

    // ─── Transitions ────────────────────────────────────────────────────

    /// Draft → pending. Needs at least one creative.
    pub fn submit(&self, id: Uuid) -> AdsResult<Campaign> {
        self.get_campaign(id)?;
        if self.store.creatives_for_campaign(id).is_empty() {
            return Err(AdsError::Validation(
                "campaign needs at least one creative before submission".into(),
            ));
        }
        self.transition(id, CampaignStatus::Pending)
    }

    pub fn approve(&self, id: Uuid) -> AdsResult<Campaign> {
        self.transition(id, CampaignStatus::Active)
    }

    pub fn reject(&self, id: Uuid, reason: &str) -> AdsResult<Campaign> {
        let campaign = self.transition(id, CampaignStatus::Rejected)?;
        info!(campaign_id = %id, reason, "Campaign rejected");
        Ok(campaign)
    }

    pub fn pause(&self, id: Uuid) -> AdsResult<Campaign> {
        self.transition(id, CampaignStatus::Paused)
    }

    /// Paused or budget-exhausted → active, provided the wallet holds at
    /// least the resume threshold of the daily budget.
    pub fn resume(&self, id: Uuid) -> AdsResult<Campaign> {
        let campaign = self.get_campaign(id)?;
        lifecycle::transition(campaign.status, CampaignStatus::Active)?;
        if !matches!(
            campaign.status,
            CampaignStatus::Paused | CampaignStatus::BudgetExhausted
        ) {
            return Err(AdsError::InvalidTransition {
                from: campaign.status,
                to: CampaignStatus::Active,
            });
        }

        let required = campaign.daily_budget * self.resume_threshold;
        let available = self
            .store
            .wallet_for_account(campaign.account_id)
            .map_or(0.0, |w| w.balance_available);
        if available < required {
            return Err(AdsError::Validation(format!(
                "wallet balance {available:.2} is below the {required:.2} needed to resume"
            )));
        }
        self.transition(id, CampaignStatus::Active)
    }

    pub fn end(&self, id: Uuid) -> AdsResult<Campaign> {
        self.transition(id, CampaignStatus::Ended)
    }

    fn transition(&self, id: Uuid, to: CampaignStatus) -> AdsResult<Campaign> {
        let mut from = None;
        let campaign = self.apply(id, |c| {
            from = Some(c.status);
            c.status = lifecycle::transition(c.status, to)?;
            Ok(())
        })?;
        metrics::counter!("campaign.transitions", "to" => to.as_str()).increment(1);
        info!(
            campaign_id = %id,
            from = from.map(|s| s.as_str()).unwrap_or_default(),
            to = to.as_str(),
            "Campaign status changed"
        );
        Ok(campaign)
    }

    /// Run `update` under the store's row lock, surfacing its own error
    /// instead of the store's abort marker.
    fn apply(
        &self,
        id: Uuid,
        mut update: impl FnMut(&mut Campaign) -> AdsResult<()>,
    ) -> AdsResult<Campaign> {
        let mut failure: Option<AdsError> = None;
        let result = self.store.update_campaign(id, &mut |c| match update(c) {
            Ok(()) => {
                c.updated_at = Utc::now();
                Ok(())
            }
            Err(e) => {
                failure = Some(e);
                Err(StoreError::Conflict("update aborted".into()))
            }
        });
        match (result, failure) {
            (_, Some(e)) => Err(e),
            (Ok(c), None) => Ok(c),
            (Err(e), None) => Err(e.into()),
        }
    }

    fn check_budgets(&self, daily_budget: f64, total_budget: Option<f64>) -> AdsResult<()> {
        if !daily_budget.is_finite() || daily_budget < self.min_daily_budget {
            return Err(AdsError::Validation(format!(
                "daily_budget must be at least {:.2}",
                self.min_daily_budget
            )));
        }
        if let Some(total) = total_budget {
            if !total.is_finite() || total < daily_budget {
                return Err(AdsError::Validation(
                    "total_budget must be at least the daily budget".into(),
                ));
            }
        }
        Ok(())
    }
}

fn check_window(
    start_at: &Option<chrono::DateTime<Utc>>,
    end_at: &Option<chrono::DateTime<Utc>>,
) -> AdsResult<()> {
    if let (Some(start), Some(end)) = (start_at, end_at) {
        if end < start {
            return Err(AdsError::Validation("end_at must not precede start_at".into()));
        }
    }
    Ok(())
}

fn parse_targeting(raw: &serde_json::Value) -> AdsResult<TargetingSpec> {
    let report = targeting::validate(raw);
    match report.normalized {
        Some(spec) if report.valid => Ok(spec),
        _ => Err(AdsError::Validation(format!(
            "invalid targeting: {}",
            serde_json::to_string(&report.errors)?
        ))),
    }
}
