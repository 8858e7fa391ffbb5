//! Prefetch of external ranking inputs: listing attributes through the
//! listing cache, historical CTR through a short-lived local cache over
//! the daily rollups.

use crate::engine::{Candidate, CandidateSignals};
use motorads_cache::{ListingCache, LocalCache};
use motorads_core::config::RankingConfig;
use motorads_core::types::{CtrHistory, Listing, ListingId, Placement};
use motorads_store::AdStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const CTR_CACHE_CAPACITY: usize = 200_000;

pub struct SignalLoader {
    listings: Arc<ListingCache>,
    store: Arc<dyn AdStore>,
    ctr_cache: LocalCache<(Uuid, Placement), CtrHistory>,
}

impl SignalLoader {
    pub fn new(listings: Arc<ListingCache>, store: Arc<dyn AdStore>, config: &RankingConfig) -> Self {
        Self {
            listings,
            store,
            ctr_cache: LocalCache::new(config.ctr_cache_ttl_secs, CTR_CACHE_CAPACITY),
        }
    }

    /// Historical CTR of a creative on a placement, cached.
    pub fn ctr_history(&self, creative_id: Uuid, placement: Placement) -> CtrHistory {
        let key = (creative_id, placement);
        if let Some(history) = self.ctr_cache.get(&key) {
            return history;
        }
        let history = self.store.ctr_history(creative_id, placement);
        self.ctr_cache.put(key, history);
        history
    }

    /// Listings for every candidate, fetched concurrently. Missing or
    /// unreachable listings are simply absent.
    pub async fn listings(&self, candidates: &[Candidate]) -> HashMap<ListingId, Listing> {
        self.listings
            .get_many(candidates.iter().map(|c| c.creative.listing_id))
            .await
    }

    /// Pair each candidate with its signals, preserving order.
    pub fn attach(
        &self,
        candidates: Vec<Candidate>,
        listings: &HashMap<ListingId, Listing>,
        placement: Placement,
    ) -> Vec<(Candidate, CandidateSignals)> {
        let paired: Vec<(Candidate, CandidateSignals)> = candidates
            .into_iter()
            .map(|candidate| {
                let signals = CandidateSignals {
                    listing: listings.get(&candidate.creative.listing_id).cloned(),
                    ctr: Some(self.ctr_history(candidate.creative.id, placement)),
                };
                (candidate, signals)
            })
            .collect();
        debug!(
            candidates = paired.len(),
            listings = listings.len(),
            "Ranking signals attached"
        );
        paired
    }

    pub fn maintenance(&self) {
        self.ctr_cache.evict_expired();
        self.listings.maintenance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use motorads_cache::StaticListingProvider;
    use motorads_core::config::AdsConfig;
    use motorads_core::types::{DailyStatKey, EventKind, StatDelta};
    use motorads_store::MemoryStore;

    #[tokio::test]
    async fn test_ctr_history_is_cached() {
        let store = Arc::new(MemoryStore::new());
        let listings = Arc::new(ListingCache::new(
            Arc::new(StaticListingProvider::new()),
            None,
            60,
        ));
        let loader = SignalLoader::new(listings, store.clone(), &AdsConfig::default().ranking);

        let creative_id = Uuid::new_v4();
        let key = DailyStatKey {
            date: Utc::now().date_naive(),
            campaign_id: Uuid::new_v4(),
            creative_id,
            placement: Placement::Home,
        };
        store.upsert_daily_stat(key, StatDelta::for_event(EventKind::Impression, 0.0));
        assert_eq!(loader.ctr_history(creative_id, Placement::Home).impressions, 1);

        // Served from cache until the TTL lapses.
        store.upsert_daily_stat(key, StatDelta::for_event(EventKind::Impression, 0.0));
        assert_eq!(loader.ctr_history(creative_id, Placement::Home).impressions, 1);
    }
}
