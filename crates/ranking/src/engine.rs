//! Scoring is a pure function of the candidate, the request context and
//! prefetched signals (listing attributes, CTR history). Nothing here does
//! I/O, so candidates can be scored in any order or in parallel.

use motorads_core::config::{AdsConfig, AvgCtrConfig, MedianBidsConfig, RankingConfig};
use motorads_core::types::{
    Campaign, Creative, CtrHistory, Listing, Placement, PricingModel, ServeContext,
};
use serde::Serialize;

const GEO_WEIGHT: f64 = 0.35;
const PLACEMENT_WEIGHT: f64 = 0.25;
const INTENT_WEIGHT: f64 = 0.30;
const AUDIENCE_WEIGHT: f64 = 0.10;

const NEUTRAL: f64 = 0.5;
const MIN_GOOD_IMAGES: usize = 5;

/// An eligible creative together with its campaign.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub creative: Creative,
    pub campaign: Campaign,
}

/// Externally sourced inputs to scoring, loaded ahead of time.
#[derive(Debug, Clone, Default)]
pub struct CandidateSignals {
    pub listing: Option<Listing>,
    pub ctr: Option<CtrHistory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub bid_norm: f64,
    pub quality: f64,
    pub relevance: f64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub signals: CandidateSignals,
    pub breakdown: ScoreBreakdown,
}

impl RankedCandidate {
    pub fn score(&self) -> f64 {
        self.breakdown.score
    }
}

pub struct RankingEngine {
    weights: RankingConfig,
    median_bids: MedianBidsConfig,
    avg_ctr: AvgCtrConfig,
}

impl RankingEngine {
    pub fn new(config: &AdsConfig) -> Self {
        Self {
            weights: config.ranking.clone(),
            median_bids: config.median_bids.clone(),
            avg_ctr: config.avg_ctr.clone(),
        }
    }

    // ─── Bid ────────────────────────────────────────────────────────────

    fn median_bid(&self, pricing: PricingModel, placement: Placement) -> f64 {
        let median = self.median_bids.for_placement(placement);
        match pricing {
            PricingModel::Cpc => median.cpc,
            PricingModel::Cpm => median.cpm,
        }
    }

    /// Campaigns carry no explicit bid yet, so they bid the placement median.
    pub fn effective_bid(&self, campaign: &Campaign, placement: Placement) -> f64 {
        self.median_bid(campaign.pricing_model, placement)
    }

    pub fn bid_norm(&self, campaign: &Campaign, placement: Placement) -> f64 {
        let median = self.median_bid(campaign.pricing_model, placement);
        if median <= 0.0 {
            return 1.0;
        }
        self.effective_bid(campaign, placement) / median
    }

    // ─── Relevance ──────────────────────────────────────────────────────

    /// Agreement between the request's search filters and the listing.
    pub fn intent_match(listing: Option<&Listing>, ctx: &ServeContext) -> f64 {
        let Some(listing) = listing else {
            return NEUTRAL;
        };

        let same = |wanted: &Option<String>, actual: &Option<String>| match (wanted, actual) {
            (Some(w), Some(a)) => w.to_lowercase() == a.to_lowercase(),
            _ => false,
        };

        let mut score = 0.0;
        if same(&ctx.search_make, &listing.make) {
            score += 0.4;
        }
        if same(&ctx.search_model, &listing.model) {
            score += 0.4;
        }
        if let (Some(range), Some(price)) = (ctx.price_range, listing.price) {
            if range.contains(price) {
                score += 0.2;
            }
        }
        f64::min(score, 1.0)
    }

    pub fn relevance(&self, campaign: &Campaign, listing: Option<&Listing>, ctx: &ServeContext) -> f64 {
        let targeting = &campaign.targeting;
        GEO_WEIGHT * targeting.geo_affinity(ctx)
            + PLACEMENT_WEIGHT * targeting.placement_affinity(ctx.placement)
            + INTENT_WEIGHT * Self::intent_match(listing, ctx)
            + AUDIENCE_WEIGHT * targeting.audience_affinity(ctx.user_type)
    }

    // ─── Quality ────────────────────────────────────────────────────────

    /// Listing completeness: 0.2 baseline plus 0.2 each for a full gallery,
    /// an inspection report and populated price/make/model.
    pub fn page_quality(listing: Option<&Listing>) -> f64 {
        let Some(listing) = listing else {
            return NEUTRAL;
        };

        let mut score = 0.2;
        if listing.images.len() >= MIN_GOOD_IMAGES {
            score += 0.2;
        }
        if listing.inspection_report {
            score += 0.2;
        }
        if listing.price.is_some() && listing.make.is_some() && listing.model.is_some() {
            score += 0.2;
        }
        f64::min(score, 1.0)
    }

    /// Historical CTR relative to the placement average; neutral until
    /// enough impressions have accumulated.
    pub fn ctr_norm(&self, history: Option<CtrHistory>, placement: Placement) -> f64 {
        let Some(history) = history else {
            return NEUTRAL;
        };
        if history.impressions < self.weights.min_ctr_impressions {
            return NEUTRAL;
        }
        let avg = self.avg_ctr.for_placement(placement);
        (history.ctr_percent() / avg * 2.0).clamp(0.0, 1.0)
    }

    /// Complaint tracking does not exist yet; every creative scores 0.
    pub fn complaint_rate(_creative: &Creative) -> f64 {
        0.0
    }

    pub fn quality(&self, creative: &Creative, signals: &CandidateSignals, placement: Placement) -> f64 {
        let quality = 0.4 * Self::page_quality(signals.listing.as_ref())
            + 0.4 * self.ctr_norm(signals.ctr, placement)
            + 0.2 * (1.0 - Self::complaint_rate(creative));
        quality.clamp(0.0, 1.0)
    }

    /// Cheap eligibility estimate, no CTR lookup.
    pub fn quick_quality(listing: Option<&Listing>) -> f64 {
        Self::page_quality(listing)
    }

    pub fn passes_quality_floor(&self, listing: Option<&Listing>) -> bool {
        Self::quick_quality(listing) >= self.weights.quality_floor
    }

    // ─── Score ──────────────────────────────────────────────────────────

    pub fn score(
        &self,
        candidate: &Candidate,
        signals: &CandidateSignals,
        ctx: &ServeContext,
    ) -> ScoreBreakdown {
        let bid_norm = self.bid_norm(&candidate.campaign, ctx.placement);
        let quality = self.quality(&candidate.creative, signals, ctx.placement);
        let relevance = self.relevance(&candidate.campaign, signals.listing.as_ref(), ctx);

        let score = bid_norm.powf(self.weights.bid_weight)
            * quality.powf(self.weights.quality_weight)
            * relevance.powf(self.weights.relevance_weight);

        ScoreBreakdown {
            bid_norm,
            quality,
            relevance,
            score: if score.is_finite() { score.max(0.0) } else { 0.0 },
        }
    }

    /// Score and sort descending. The sort is stable: equal scores keep
    /// their input order.
    pub fn rank(
        &self,
        candidates: Vec<(Candidate, CandidateSignals)>,
        ctx: &ServeContext,
    ) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|(candidate, signals)| {
                let breakdown = self.score(&candidate, &signals, ctx);
                RankedCandidate {
                    candidate,
                    signals,
                    breakdown,
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.score().total_cmp(&a.score()));

        metrics::counter!("ranking.scored").increment(ranked.len() as u64);
        let zero = ranked.iter().filter(|r| r.score() <= 0.0).count();
        if zero > 0 {
            metrics::counter!("ranking.zero_scores").increment(zero as u64);
        }
        if let Some(top) = ranked.first() {
            metrics::histogram!("ranking.top_score", "placement" => ctx.placement.as_str())
                .record(top.score());
        }
        ranked
    }
}
