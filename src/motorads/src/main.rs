//! MotorAds: sponsored-listing ad server for a vehicle marketplace.
//!
//! Main entry point that wires the store, caches, ledger and orchestrators
//! and starts the HTTP server.

use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use motorads_api::{ApiServer, AppState};
use motorads_billing::WalletLedger;
use motorads_cache::{
    HttpListingProvider, ListingCache, ListingProvider, MemoryRateCounter, RateCounter, RedisCache,
    RedisRateCounter, StaticListingProvider,
};
use motorads_core::config::{AppConfig, DEFAULT_TRACKING_SECRET};
use motorads_core::types::{Listing, ListingImage};
use motorads_fraud::FraudEngine;
use motorads_management::CampaignService;
use motorads_serving::{ServingOrchestrator, TokenSigner};
use motorads_store::{AdStore, MemoryStore};
use motorads_tracking::TrackingOrchestrator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "motorads")]
#[command(about = "Sponsored-listing ad server for a vehicle marketplace")]
#[command(version)]
struct Cli {
    /// Node identifier reported by /health
    #[arg(long, env = "MOTORADS__NODE_ID", default_value = "motorads-node-1")]
    node_id: String,

    /// HTTP port (overrides config)
    #[arg(long, env = "MOTORADS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "MOTORADS__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Keep fraud counters in Redis instead of process memory
    #[arg(long, default_value_t = false)]
    redis: bool,

    /// Seed a demo wallet, campaign and listings on start-up
    #[arg(long, default_value_t = false)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motorads=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("MotorAds starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }

    info!(
        node_id = %cli.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        currency = %config.ads.currency,
        "Configuration loaded"
    );

    if config.ads.tracking.secret == DEFAULT_TRACKING_SECRET {
        warn!("Tracking tokens are signed with the built-in development secret");
    }

    let store = Arc::new(MemoryStore::new());

    // Redis is optional: it backs fraud counters and the shared listing cache.
    let redis = if cli.redis {
        match RedisCache::new(&config.redis).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                error!(error = %e, "Failed to connect to Redis, falling back to in-process counters");
                None
            }
        }
    } else {
        None
    };

    let memory_counter = Arc::new(MemoryRateCounter::new());
    let counter: Arc<dyn RateCounter> = match &redis {
        Some(cache) => Arc::new(RedisRateCounter::new(cache.clone())),
        None => memory_counter.clone(),
    };

    let provider: Arc<dyn ListingProvider> = if cli.demo {
        let listings = demo_listings();
        let ids: Vec<_> = listings.iter().map(|l| l.id).collect();
        let campaign_id = store.seed_demo_data(&ids)?;
        info!(campaign_id = %campaign_id, listings = ids.len(), "Demo mode enabled");
        Arc::new(StaticListingProvider::with_listings(listings))
    } else {
        Arc::new(HttpListingProvider::new(&config.listing_provider)?)
    };
    let listings = Arc::new(ListingCache::new(
        provider,
        redis.clone(),
        config.listing_provider.cache_ttl_secs,
    ));

    let signer = Arc::new(TokenSigner::new(&config.ads.tracking));
    let ledger = Arc::new(WalletLedger::new(store.clone(), config.ads.currency.clone()));
    let fraud = FraudEngine::new(config.ads.anti_fraud.clone(), counter);
    let serving = Arc::new(ServingOrchestrator::new(
        store.clone(),
        listings.clone(),
        signer.clone(),
        &config.ads,
    ));
    let tracking = Arc::new(TrackingOrchestrator::new(
        store.clone(),
        ledger.clone(),
        fraud,
        signer,
        &config.ads,
    ));
    let campaigns = Arc::new(CampaignService::new(store.clone(), &config.ads));

    let ready = Arc::new(AtomicBool::new(false));
    let state = AppState {
        serving: serving.clone(),
        tracking,
        ledger,
        campaigns,
        node_id: cli.node_id.clone(),
        start_time: Instant::now(),
        ready: ready.clone(),
    };

    let api_server = ApiServer::new(config.clone(), state);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Spawn cache maintenance task
    let fraud_window = Duration::from_secs(
        config
            .ads
            .anti_fraud
            .click_window_secs
            .max(config.ads.anti_fraud.fingerprint_ttl_secs)
            .max(config.ads.anti_fraud.duplicate_window_secs),
    );
    let serving_for_maintenance = serving.clone();
    let listings_for_maintenance = listings.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            serving_for_maintenance.maintenance();
            listings_for_maintenance.maintenance();
            let evicted = memory_counter.evict_expired(Utc::now(), fraud_window);
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted expired rate counters");
            }
        }
    });

    // Daily spend counters roll over at UTC midnight.
    let store_for_rollover = store.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_utc_midnight()).await;
            let reset = store_for_rollover.reset_daily_spend();
            info!(campaigns = reset, "Daily spend counters reset");
        }
    });

    ready.store(true, Ordering::Release);
    info!("MotorAds is ready to serve traffic");

    api_server.start_http().await?;

    info!("MotorAds shutting down");
    Ok(())
}

fn until_next_utc_midnight() -> Duration {
    let now = Utc::now();
    let next = (now.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc());
    next.and_then(|t| (t - now).to_std().ok())
        .unwrap_or(Duration::from_secs(60))
}

fn demo_listings() -> Vec<Listing> {
    let rows: [(u64, &str, &str, u32, f64, &str, u64); 4] = [
        (1001, "Toyota", "Land Cruiser", 2022, 285_000.0, "Riyadh", 501),
        (1002, "Hyundai", "Sonata", 2021, 72_000.0, "Jeddah", 502),
        (1003, "Nissan", "Patrol", 2023, 310_000.0, "Riyadh", 503),
        (1004, "Kia", "Sportage", 2020, 58_500.0, "Dammam", 501),
    ];
    rows.into_iter()
        .map(|(id, make, model, year, price, city, owner)| Listing {
            id,
            make: Some(make.to_string()),
            model: Some(model.to_string()),
            year: Some(year),
            price: Some(price),
            city: Some(city.to_string()),
            images: vec![ListingImage {
                url: format!("https://cdn.example.com/listings/{id}/main.jpg"),
            }],
            inspection_report: id % 2 == 1,
            owner_id: Some(owner),
        })
        .collect()
}
