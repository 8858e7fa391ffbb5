use crate::types::Placement;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `MOTORADS__` (nested keys separated by `__`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub listing_provider: ListingProviderConfig,
    #[serde(default)]
    pub ads: AdsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingProviderConfig {
    #[serde(default = "default_listing_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_listing_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_listing_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_listing_base_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_listing_timeout_secs() -> u64 {
    30
}
fn default_listing_cache_ttl_secs() -> u64 {
    1800
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            ttl_secs: default_ttl_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ListingProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_listing_base_url(),
            api_token: None,
            timeout_secs: default_listing_timeout_secs(),
            cache_ttl_secs: default_listing_cache_ttl_secs(),
        }
    }
}

// ─── Ads Config ─────────────────────────────────────────────────────────

/// Marketplace ad tunables: pricing, ranking, anti-fraud and serving limits.
#[derive(Debug, Clone, Deserialize)]
pub struct AdsConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_min_daily_budget")]
    pub min_daily_budget: f64,
    #[serde(default)]
    pub median_bids: MedianBidsConfig,
    #[serde(default)]
    pub avg_ctr: AvgCtrConfig,
    #[serde(default)]
    pub slots: SlotsConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub anti_fraud: AntiFraudConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub serving: ServingConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

fn default_currency() -> String {
    "SAR".to_string()
}
fn default_min_daily_budget() -> f64 {
    10.0
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            min_daily_budget: default_min_daily_budget(),
            median_bids: MedianBidsConfig::default(),
            avg_ctr: AvgCtrConfig::default(),
            slots: SlotsConfig::default(),
            ranking: RankingConfig::default(),
            anti_fraud: AntiFraudConfig::default(),
            tracking: TrackingConfig::default(),
            serving: ServingConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}

/// Reference CPC/CPM prices for one placement.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MedianBid {
    pub cpc: f64,
    pub cpm: f64,
}

impl MedianBid {
    const fn new(cpc: f64, cpm: f64) -> Self {
        Self { cpc, cpm }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MedianBidsConfig {
    #[serde(default = "default_bid_search")]
    pub search_listings: MedianBid,
    #[serde(default = "default_bid_details")]
    pub car_details: MedianBid,
    #[serde(default = "default_bid_auction")]
    pub auction_room: MedianBid,
    #[serde(default = "default_bid_home")]
    pub home: MedianBid,
    #[serde(default = "default_bid_live")]
    pub live_stream_overlay: MedianBid,
    #[serde(default = "default_bid_fallback")]
    pub fallback: MedianBid,
}

fn default_bid_search() -> MedianBid {
    MedianBid::new(1.5, 15.0)
}
fn default_bid_details() -> MedianBid {
    MedianBid::new(1.0, 10.0)
}
fn default_bid_auction() -> MedianBid {
    MedianBid::new(2.0, 20.0)
}
fn default_bid_home() -> MedianBid {
    MedianBid::new(1.2, 12.0)
}
fn default_bid_live() -> MedianBid {
    MedianBid::new(2.5, 25.0)
}
fn default_bid_fallback() -> MedianBid {
    MedianBid::new(1.5, 15.0)
}

impl Default for MedianBidsConfig {
    fn default() -> Self {
        Self {
            search_listings: default_bid_search(),
            car_details: default_bid_details(),
            auction_room: default_bid_auction(),
            home: default_bid_home(),
            live_stream_overlay: default_bid_live(),
            fallback: default_bid_fallback(),
        }
    }
}

impl MedianBidsConfig {
    /// Placement medians; a non-positive configured price falls back.
    pub fn for_placement(&self, placement: Placement) -> MedianBid {
        let bid = match placement {
            Placement::SearchListings => self.search_listings,
            Placement::CarDetails => self.car_details,
            Placement::AuctionRoom => self.auction_room,
            Placement::Home => self.home,
            Placement::LiveStreamOverlay => self.live_stream_overlay,
        };
        MedianBid {
            cpc: if bid.cpc > 0.0 { bid.cpc } else { self.fallback.cpc },
            cpm: if bid.cpm > 0.0 { bid.cpm } else { self.fallback.cpm },
        }
    }
}

/// Average click-through rate per placement, in percent.
#[derive(Debug, Clone, Deserialize)]
pub struct AvgCtrConfig {
    #[serde(default = "default_ctr_search")]
    pub search_listings: f64,
    #[serde(default = "default_ctr_details")]
    pub car_details: f64,
    #[serde(default = "default_ctr_auction")]
    pub auction_room: f64,
    #[serde(default = "default_ctr_home")]
    pub home: f64,
    #[serde(default = "default_ctr_live")]
    pub live_stream_overlay: f64,
    #[serde(default = "default_ctr_fallback")]
    pub fallback: f64,
}

fn default_ctr_search() -> f64 {
    2.0
}
fn default_ctr_details() -> f64 {
    3.0
}
fn default_ctr_auction() -> f64 {
    2.5
}
fn default_ctr_home() -> f64 {
    1.5
}
fn default_ctr_live() -> f64 {
    1.0
}
fn default_ctr_fallback() -> f64 {
    2.0
}

impl Default for AvgCtrConfig {
    fn default() -> Self {
        Self {
            search_listings: default_ctr_search(),
            car_details: default_ctr_details(),
            auction_room: default_ctr_auction(),
            home: default_ctr_home(),
            live_stream_overlay: default_ctr_live(),
            fallback: default_ctr_fallback(),
        }
    }
}

impl AvgCtrConfig {
    /// Placement average; non-positive configured values fall back.
    pub fn for_placement(&self, placement: Placement) -> f64 {
        let value = match placement {
            Placement::SearchListings => self.search_listings,
            Placement::CarDetails => self.car_details,
            Placement::AuctionRoom => self.auction_room,
            Placement::Home => self.home,
            Placement::LiveStreamOverlay => self.live_stream_overlay,
        };
        if value > 0.0 {
            value
        } else {
            self.fallback
        }
    }
}

/// Number of ads returned per serve request on each placement.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotsConfig {
    #[serde(default = "default_slots_multi")]
    pub search_listings: usize,
    #[serde(default = "default_slots_multi")]
    pub car_details: usize,
    #[serde(default = "default_slots_single")]
    pub auction_room: usize,
    #[serde(default = "default_slots_single")]
    pub live_stream_overlay: usize,
    #[serde(default = "default_slots_multi")]
    pub home: usize,
}

fn default_slots_multi() -> usize {
    3
}
fn default_slots_single() -> usize {
    1
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            search_listings: default_slots_multi(),
            car_details: default_slots_multi(),
            auction_room: default_slots_single(),
            live_stream_overlay: default_slots_single(),
            home: default_slots_multi(),
        }
    }
}

impl SlotsConfig {
    pub fn for_placement(&self, placement: Placement) -> usize {
        let slots = match placement {
            Placement::SearchListings => self.search_listings,
            Placement::CarDetails => self.car_details,
            Placement::AuctionRoom => self.auction_room,
            Placement::LiveStreamOverlay => self.live_stream_overlay,
            Placement::Home => self.home,
        };
        if slots == 0 {
            default_slots_multi()
        } else {
            slots
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_bid_weight")]
    pub bid_weight: f64,
    #[serde(default = "default_quality_weight")]
    pub quality_weight: f64,
    #[serde(default = "default_relevance_weight")]
    pub relevance_weight: f64,
    #[serde(default = "default_quality_floor")]
    pub quality_floor: f64,
    #[serde(default = "default_min_ctr_impressions")]
    pub min_ctr_impressions: u64,
    #[serde(default = "default_ctr_cache_ttl_secs")]
    pub ctr_cache_ttl_secs: u64,
}

fn default_bid_weight() -> f64 {
    0.7
}
fn default_quality_weight() -> f64 {
    1.0
}
fn default_relevance_weight() -> f64 {
    1.2
}
fn default_quality_floor() -> f64 {
    0.2
}
fn default_min_ctr_impressions() -> u64 {
    100
}
fn default_ctr_cache_ttl_secs() -> u64 {
    3600
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            bid_weight: default_bid_weight(),
            quality_weight: default_quality_weight(),
            relevance_weight: default_relevance_weight(),
            quality_floor: default_quality_floor(),
            min_ctr_impressions: default_min_ctr_impressions(),
            ctr_cache_ttl_secs: default_ctr_cache_ttl_secs(),
        }
    }
}

// ─── Anti-fraud Config ──────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct AntiFraudConfig {
    #[serde(default = "default_click_cooldown_secs")]
    pub click_cooldown_secs: u64,
    #[serde(default = "default_max_clicks_per_session_creative")]
    pub max_clicks_per_session_creative: u64,
    #[serde(default = "default_max_clicks_per_window")]
    pub max_clicks_per_window: u64,
    #[serde(default = "default_click_window_secs")]
    pub click_window_secs: u64,
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,
    #[serde(default = "default_fingerprint_ttl_secs")]
    pub fingerprint_ttl_secs: u64,
    #[serde(default = "default_min_viewport_seconds")]
    pub min_viewport_seconds: f64,
    #[serde(default = "default_min_visible_ratio")]
    pub min_visible_ratio: f64,
    #[serde(default = "default_bot_patterns")]
    pub bot_patterns: Vec<String>,
}

fn default_click_cooldown_secs() -> u64 {
    20
}
fn default_max_clicks_per_session_creative() -> u64 {
    10
}
fn default_max_clicks_per_window() -> u64 {
    20
}
fn default_click_window_secs() -> u64 {
    300
}
fn default_duplicate_window_secs() -> u64 {
    10
}
fn default_fingerprint_ttl_secs() -> u64 {
    60
}
fn default_min_viewport_seconds() -> f64 {
    1.0
}
fn default_min_visible_ratio() -> f64 {
    0.5
}
fn default_bot_patterns() -> Vec<String> {
    [
        "bot",
        "crawler",
        "spider",
        "scraper",
        "curl",
        "wget",
        "python-requests",
        "java/",
        "postman",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Default for AntiFraudConfig {
    fn default() -> Self {
        Self {
            click_cooldown_secs: default_click_cooldown_secs(),
            max_clicks_per_session_creative: default_max_clicks_per_session_creative(),
            max_clicks_per_window: default_max_clicks_per_window(),
            click_window_secs: default_click_window_secs(),
            duplicate_window_secs: default_duplicate_window_secs(),
            fingerprint_ttl_secs: default_fingerprint_ttl_secs(),
            min_viewport_seconds: default_min_viewport_seconds(),
            min_visible_ratio: default_min_visible_ratio(),
            bot_patterns: default_bot_patterns(),
        }
    }
}

// ─── Tracking / Serving / Budget ────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: i64,
    #[serde(default = "default_tracking_secret")]
    pub secret: String,
}

pub const DEFAULT_TRACKING_SECRET: &str = "motorads-dev-tracking-secret";

fn default_token_ttl_secs() -> i64 {
    600
}
fn default_tracking_secret() -> String {
    DEFAULT_TRACKING_SECRET.to_string()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
            secret: default_tracking_secret(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServingConfig {
    #[serde(default = "default_max_per_owner")]
    pub max_per_owner: usize,
    #[serde(default = "default_impression_cap")]
    pub default_impression_cap: u32,
}

fn default_max_per_owner() -> usize {
    2
}
fn default_impression_cap() -> u32 {
    5
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            max_per_owner: default_max_per_owner(),
            default_impression_cap: default_impression_cap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Fraction of the daily budget that must be available to resume.
    #[serde(default = "default_resume_threshold")]
    pub resume_threshold: f64,
}

fn default_resume_threshold() -> f64 {
    0.10
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            resume_threshold: default_resume_threshold(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("MOTORADS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("redis.urls")
                .with_list_parse_key("ads.anti_fraud.bot_patterns"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
