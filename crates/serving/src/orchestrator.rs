//! Serve pipeline: eligible creatives → rank → frequency cap → owner
//! diversity → top K → token + render.

use crate::render::{render, RenderedAd};
use crate::token::{TokenPayload, TokenSigner};
use chrono::{DateTime, Utc};
use motorads_cache::ListingCache;
use motorads_core::config::{AdsConfig, SlotsConfig};
use motorads_core::fingerprint::session_hash;
use motorads_core::targeting::TargetingSpec;
use motorads_core::types::{ListingId, OwnerId, Placement, ServeContext, Viewer};
use motorads_ranking::{Candidate, RankedCandidate, RankingEngine, SignalLoader};
use motorads_store::AdStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One selected ad, ready for the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServedAd {
    pub creative_id: Uuid,
    pub campaign_id: Uuid,
    pub listing_id: ListingId,
    pub placement: Placement,
    pub position: Option<String>,
    pub tracking_token: String,
    pub rendered: RenderedAd,
}

pub struct ServingOrchestrator {
    store: Arc<dyn AdStore>,
    ranking: RankingEngine,
    signals: SignalLoader,
    signer: Arc<TokenSigner>,
    slots: SlotsConfig,
    max_per_owner: usize,
    default_impression_cap: u32,
}

impl ServingOrchestrator {
    pub fn new(
        store: Arc<dyn AdStore>,
        listings: Arc<ListingCache>,
        signer: Arc<TokenSigner>,
        config: &AdsConfig,
    ) -> Self {
        info!(
            max_per_owner = config.serving.max_per_owner,
            default_impression_cap = config.serving.default_impression_cap,
            "Serving orchestrator initialized"
        );
        Self {
            ranking: RankingEngine::new(config),
            signals: SignalLoader::new(listings, store.clone(), &config.ranking),
            store,
            signer,
            slots: config.slots.clone(),
            max_per_owner: config.serving.max_per_owner,
            default_impression_cap: config.serving.default_impression_cap,
        }
    }

    /// Ads per serve for a placement.
    pub fn slots_for(&self, placement: Placement) -> usize {
        self.slots.for_placement(placement)
    }

    pub async fn serve(&self, ctx: &ServeContext, limit: usize) -> Vec<ServedAd> {
        self.serve_at(ctx, limit, Utc::now()).await
    }

    pub async fn serve_at(&self, ctx: &ServeContext, limit: usize, now: DateTime<Utc>) -> Vec<ServedAd> {
        let start = Instant::now();
        metrics::counter!("serve.requests", "placement" => ctx.placement.as_str()).increment(1);

        let eligible = self.eligible(ctx, now);
        metrics::histogram!("serve.candidates").record(eligible.len() as f64);
        if eligible.is_empty() || limit == 0 {
            debug!(placement = %ctx.placement, "No eligible creatives");
            return Vec::new();
        }

        let listings = self.signals.listings(&eligible).await;
        let eligible: Vec<Candidate> = eligible
            .into_iter()
            .filter(|c| {
                self.ranking
                    .passes_quality_floor(listings.get(&c.creative.listing_id))
            })
            .collect();

        let ranked = self
            .ranking
            .rank(self.signals.attach(eligible, &listings, ctx.placement), ctx);
        let ranked = self.apply_frequency_caps(ranked, ctx, now);
        let ranked = self.apply_diversity(ranked);

        let served: Vec<ServedAd> = ranked
            .into_iter()
            .take(limit)
            .filter_map(|r| self.finalize(r, ctx, now))
            .collect();

        metrics::counter!("serve.returned").increment(served.len() as u64);
        metrics::histogram!("serve.latency_seconds").record(start.elapsed().as_secs_f64());
        debug!(
            placement = %ctx.placement,
            returned = served.len(),
            "Serve completed"
        );
        served
    }

    // ─── Pipeline stages ────────────────────────────────────────────────

    /// Active, in-window, approved, funded, under daily budget, targeted.
    fn eligible(&self, ctx: &ServeContext, now: DateTime<Utc>) -> Vec<Candidate> {
        let mut funded: HashMap<Uuid, bool> = HashMap::new();
        self.store
            .servable_creatives()
            .into_iter()
            .filter(|(_, campaign)| {
                campaign.is_within_window(now) && campaign.has_remaining_daily_budget()
            })
            .filter(|(_, campaign)| {
                *funded.entry(campaign.account_id).or_insert_with(|| {
                    self.store
                        .wallet_for_account(campaign.account_id)
                        .is_some_and(|w| w.balance_available > 0.0)
                })
            })
            .filter(|(_, campaign)| campaign.targeting.matches(ctx, now))
            .map(|(creative, campaign)| Candidate { creative, campaign })
            .collect()
    }

    /// Drop creatives this viewer has already seen `cap` times today.
    fn apply_frequency_caps(
        &self,
        ranked: Vec<RankedCandidate>,
        ctx: &ServeContext,
        now: DateTime<Utc>,
    ) -> Vec<RankedCandidate> {
        if ctx.user_id.is_none() && ctx.session_id.is_empty() {
            return ranked;
        }
        let viewer = Viewer::of(ctx.user_id.as_deref(), &session_hash(&ctx.session_id));
        let today = now.date_naive();

        ranked
            .into_iter()
            .filter(|r| {
                let cap = self.impression_cap(&r.candidate.campaign.targeting);
                let seen = self
                    .store
                    .count_impressions(&viewer, r.candidate.creative.id, today);
                seen < u64::from(cap)
            })
            .collect()
    }

    fn impression_cap(&self, targeting: &TargetingSpec) -> u32 {
        match targeting.schedule.as_ref().and_then(|s| s.frequency_cap) {
            Some(_) => targeting.impression_cap(),
            None => self.default_impression_cap,
        }
    }

    /// At most `max_per_owner` ads per listing owner, best-ranked first.
    /// Candidates without a known owner are never dropped.
    fn apply_diversity(&self, ranked: Vec<RankedCandidate>) -> Vec<RankedCandidate> {
        let mut seen: HashMap<OwnerId, usize> = HashMap::new();
        ranked
            .into_iter()
            .filter(|r| {
                let Some(owner) = r.signals.listing.as_ref().and_then(|l| l.owner_id) else {
                    return true;
                };
                let count = seen.entry(owner).or_insert(0);
                if *count >= self.max_per_owner {
                    return false;
                }
                *count += 1;
                true
            })
            .collect()
    }

    fn finalize(&self, ranked: RankedCandidate, ctx: &ServeContext, now: DateTime<Utc>) -> Option<ServedAd> {
        let creative = &ranked.candidate.creative;
        let payload = TokenPayload {
            creative_id: creative.id,
            campaign_id: creative.campaign_id,
            placement: ctx.placement,
            position: ctx.position.clone(),
            session_hash: session_hash(&ctx.session_id),
            served_at: now,
        };
        let tracking_token = match self.signer.issue(&payload) {
            Ok(token) => token,
            Err(e) => {
                warn!(creative_id = %creative.id, error = %e, "Failed to sign tracking token");
                return None;
            }
        };

        Some(ServedAd {
            creative_id: creative.id,
            campaign_id: creative.campaign_id,
            listing_id: creative.listing_id,
            placement: ctx.placement,
            position: ctx.position.clone(),
            tracking_token,
            rendered: render(creative, ranked.signals.listing.as_ref()),
        })
    }

    pub fn maintenance(&self) {
        self.signals.maintenance();
    }
}
