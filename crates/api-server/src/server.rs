//! API server: REST routes plus the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::{ads_rest, campaign_rest, wallet_rest};
use axum::routing::{get, post};
use axum::Router;
use motorads_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the REST router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Ads
        .route("/v1/ads/serve", get(ads_rest::handle_serve))
        .route("/v1/ads/track", post(ads_rest::handle_track))
        .route("/v1/ads/events/:id/fraud", post(ads_rest::handle_mark_fraudulent))
        // Wallets
        .route("/v1/wallets/:id/topup", post(wallet_rest::handle_topup))
        .route("/v1/wallets/:id/transactions", get(wallet_rest::handle_transactions))
        // Campaign lifecycle
        .route("/v1/campaigns/:id/submit", post(campaign_rest::handle_submit))
        .route("/v1/campaigns/:id/pause", post(campaign_rest::handle_pause))
        .route("/v1/campaigns/:id/resume", post(campaign_rest::handle_resume))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, node_id = %self.state.node_id, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use motorads_billing::WalletLedger;
    use motorads_cache::{ListingCache, MemoryRateCounter, StaticListingProvider};
    use motorads_core::config::AdsConfig;
    use motorads_core::types::Listing;
    use motorads_fraud::FraudEngine;
    use motorads_management::CampaignService;
    use motorads_serving::{ServingOrchestrator, TokenSigner};
    use motorads_store::{AdStore, MemoryStore};
    use motorads_tracking::TrackingOrchestrator;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Instant;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        router: Router,
        store: Arc<MemoryStore>,
        campaign_id: Uuid,
    }

    fn app() -> TestApp {
        let config = AdsConfig::default();
        let store = Arc::new(MemoryStore::new());
        let campaign_id = store.seed_demo_data(&[11]).unwrap();
        let listing = Listing {
            id: 11,
            make: Some("Lexus".into()),
            model: Some("LX 600".into()),
            year: Some(2024),
            price: Some(520_000.0),
            city: Some("Dammam".into()),
            images: vec![],
            inspection_report: true,
            owner_id: Some(3),
        };
        let listings = Arc::new(ListingCache::new(
            Arc::new(StaticListingProvider::with_listings([listing])),
            None,
            60,
        ));
        let signer = Arc::new(TokenSigner::with_secret(b"api-test", 600));
        let ledger = Arc::new(WalletLedger::new(store.clone(), "SAR"));
        let fraud = FraudEngine::new(config.anti_fraud.clone(), Arc::new(MemoryRateCounter::new()));

        let state = AppState {
            serving: Arc::new(ServingOrchestrator::new(
                store.clone(),
                listings,
                signer.clone(),
                &config,
            )),
            tracking: Arc::new(TrackingOrchestrator::new(
                store.clone(),
                ledger.clone(),
                fraud,
                signer,
                &config,
            )),
            ledger,
            campaigns: Arc::new(CampaignService::new(store.clone(), &config)),
            node_id: "test-node".into(),
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(true)),
        };
        TestApp {
            router: router(state),
            store,
            campaign_id,
        }
    }

    async fn call(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64)")
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_serve_then_track_click() {
        let app = app();
        let (status, body) = call(
            &app.router,
            Request::get("/v1/ads/serve?placement=search_listings&session_id=web-1&user_type=registered")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ads = body["ads"].as_array().unwrap();
        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0]["rendered"]["headline"], "Lexus LX 600");
        let token = ads[0]["tracking_token"].as_str().unwrap().to_string();

        let (status, outcome) = call(
            &app.router,
            post_json(
                "/v1/ads/track",
                json!({ "tracking_token": token, "event_type": "click", "session_id": "web-1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["ok"], true);
        assert_eq!(outcome["charged"], 1.5);

        let event_id = outcome["event_id"].as_str().unwrap();
        let (status, reclass) = call(
            &app.router,
            post_json(&format!("/v1/ads/events/{event_id}/fraud"), json!({ "reason": "bot_net" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reclass["changed"], true);
        assert_eq!(reclass["refunded"], 1.5);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_400() {
        let app = app();
        let (status, body) = call(
            &app.router,
            Request::get("/v1/ads/serve?placement=home&session_id=")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_serve_request");

        let (status, outcome) = call(
            &app.router,
            post_json(
                "/v1/ads/track",
                json!({ "tracking_token": "bogus", "event_type": "click", "session_id": "s" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["ok"], false);
    }

    #[tokio::test]
    async fn test_wallet_topup_and_listing() {
        let app = app();
        let account_id = app.store.get_campaign(app.campaign_id).unwrap().account_id;
        let wallet_id = app.store.wallet_for_account(account_id).unwrap().id;

        let (status, body) = call(
            &app.router,
            post_json(
                &format!("/v1/wallets/{wallet_id}/topup"),
                json!({ "amount": 250.0, "payment_ref": "pay-9" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance_available"], 750.0);

        let (status, body) = call(
            &app.router,
            Request::get(format!("/v1/wallets/{wallet_id}/transactions?kind=topup"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let txs = body["transactions"].as_array().unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0]["related_payment_ref"], "pay-9");

        let (status, _) = call(
            &app.router,
            post_json(&format!("/v1/wallets/{}/topup", Uuid::new_v4()), json!({ "amount": 5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_campaign_pause_resume() {
        let app = app();
        let id = app.campaign_id;
        let (status, body) = call(
            &app.router,
            post_json(&format!("/v1/campaigns/{id}/pause"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "paused");

        let (status, body) = call(
            &app.router,
            post_json(&format!("/v1/campaigns/{id}/resume"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");

        // Active campaigns cannot be submitted again.
        let (status, body) = call(
            &app.router,
            post_json(&format!("/v1/campaigns/{id}/submit"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_transition");
    }

    #[tokio::test]
    async fn test_probes() {
        let app = app();
        for path in ["/health", "/ready", "/live"] {
            let (status, _) = call(&app.router, Request::get(path).body(Body::empty()).unwrap()).await;
            assert_eq!(status, StatusCode::OK, "{path}");
        }
    }
}
