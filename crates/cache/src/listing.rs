//! External listing cache.
//!
//! Listing attributes come read-only from the marketplace provider and are
//! treated as eventually stale. Lookups go L1 (process) -> L2 (Redis, when
//! configured) -> provider. Provider failures degrade to `None` so callers
//! fall back to neutral scores instead of failing the request.

use crate::client::RedisCache;
use crate::local::LocalCache;
use async_trait::async_trait;
use dashmap::DashMap;
use motorads_core::config::ListingProviderConfig;
use motorads_core::types::{Listing, ListingId};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read-only source of listing attributes.
#[async_trait]
pub trait ListingProvider: Send + Sync {
    /// `Ok(None)` when the provider does not know the listing.
    async fn fetch_listing(&self, id: ListingId) -> anyhow::Result<Option<Listing>>;
}

// ─── HTTP provider ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Listing>,
}

/// Marketplace REST client: `GET {base_url}/cars/{id}` with a bearer token,
/// responses wrapped as `{"data": {...}}`.
pub struct HttpListingProvider {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpListingProvider {
    pub fn new(config: &ListingProviderConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(
            http,
            &config.base_url,
            config.api_token.clone(),
        ))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, api_token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }
}

#[async_trait]
impl ListingProvider for HttpListingProvider {
    async fn fetch_listing(&self, id: ListingId) -> anyhow::Result<Option<Listing>> {
        let url = format!("{}/cars/{id}", self.base_url);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(listing_id = id, "Listing not found at provider");
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("listing provider returned {status} for listing {id}");
        }

        let envelope: Envelope = response.json().await?;
        Ok(envelope.data)
    }
}

// ─── Static provider ────────────────────────────────────────────────────

/// In-memory provider for tests and demo mode.
#[derive(Default)]
pub struct StaticListingProvider {
    listings: DashMap<ListingId, Listing>,
    fetches: AtomicUsize,
}

impl StaticListingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listings(listings: impl IntoIterator<Item = Listing>) -> Self {
        let provider = Self::new();
        for listing in listings {
            provider.insert(listing);
        }
        provider
    }

    pub fn insert(&self, listing: Listing) {
        self.listings.insert(listing.id, listing);
    }

    /// Number of fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ListingProvider for StaticListingProvider {
    async fn fetch_listing(&self, id: ListingId) -> anyhow::Result<Option<Listing>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.listings.get(&id).map(|l| l.clone()))
    }
}

// ─── Cache ──────────────────────────────────────────────────────────────

const LOCAL_CAPACITY: usize = 100_000;

pub struct ListingCache {
    provider: Arc<dyn ListingProvider>,
    local: LocalCache<ListingId, Listing>,
    remote: Option<Arc<RedisCache>>,
    ttl_secs: u64,
}

impl ListingCache {
    pub fn new(
        provider: Arc<dyn ListingProvider>,
        remote: Option<Arc<RedisCache>>,
        ttl_secs: u64,
    ) -> Self {
        info!(
            ttl_secs = ttl_secs,
            redis = remote.is_some(),
            "Listing cache initialized"
        );
        Self {
            provider,
            local: LocalCache::new(ttl_secs, LOCAL_CAPACITY),
            remote,
            ttl_secs,
        }
    }

    fn redis_key(id: ListingId) -> String {
        format!("motorads:listing:{id}")
    }

    /// Fetch one listing. Never fails: misses and provider errors yield `None`.
    pub async fn get(&self, id: ListingId) -> Option<Listing> {
        if let Some(listing) = self.local.get(&id) {
            metrics::counter!("cache.l1.hit").increment(1);
            return Some(listing);
        }
        metrics::counter!("cache.l1.miss").increment(1);

        if let Some(remote) = &self.remote {
            match remote.get_json::<Listing>(&Self::redis_key(id)).await {
                Ok(Some(listing)) => {
                    self.local.put(id, listing.clone());
                    return Some(listing);
                }
                Ok(None) => {}
                Err(e) => warn!(listing_id = id, error = %e, "Redis listing lookup failed"),
            }
        }

        match self.provider.fetch_listing(id).await {
            Ok(Some(listing)) => {
                self.local.put(id, listing.clone());
                if let Some(remote) = &self.remote {
                    if let Err(e) = remote
                        .set_json(&Self::redis_key(id), &listing, Some(self.ttl_secs))
                        .await
                    {
                        warn!(listing_id = id, error = %e, "Redis listing store failed");
                    }
                }
                Some(listing)
            }
            Ok(None) => None,
            Err(e) => {
                metrics::counter!("listing.fetch_errors").increment(1);
                warn!(listing_id = id, error = %e, "Listing provider fetch failed");
                None
            }
        }
    }

    /// Fetch many listings concurrently; missing ids are absent from the map.
    pub async fn get_many(&self, ids: impl IntoIterator<Item = ListingId>) -> HashMap<ListingId, Listing> {
        let unique: BTreeSet<ListingId> = ids.into_iter().collect();
        let lookups = unique.into_iter().map(|id| async move { (id, self.get(id).await) });
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(id, listing)| listing.map(|l| (id, l)))
            .collect()
    }

    pub fn invalidate(&self, id: ListingId) {
        self.local.invalidate(&id);
    }

    /// Run periodic maintenance (L1 eviction).
    pub fn maintenance(&self) {
        let evicted = self.local.evict_expired();
        if evicted > 0 {
            debug!(evicted = evicted, "Listing cache eviction complete");
        }
    }

    pub fn local_cache_size(&self) -> usize {
        self.local.len()
    }
}
