//! Serve → track → ledger, wired the way the server wires it but with
//! in-memory backends.

use chrono::{Duration, Utc};
use motorads_billing::WalletLedger;
use motorads_cache::{ListingCache, MemoryRateCounter, StaticListingProvider};
use motorads_core::config::AdsConfig;
use motorads_core::types::{
    CampaignStatus, DailyStatKey, EventSignal, Listing, Placement, PricingModel, ServeContext,
    TrackContext, UserType, ViewportMetrics,
};
use motorads_fraud::FraudEngine;
use motorads_serving::{ServedAd, ServingOrchestrator, TokenSigner};
use motorads_store::{AdStore, MemoryStore};
use motorads_tracking::{TrackRequest, TrackingOrchestrator};
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryStore>,
    ledger: Arc<WalletLedger>,
    serving: ServingOrchestrator,
    tracking: TrackingOrchestrator,
    campaign_id: Uuid,
    wallet_id: Uuid,
}

fn listing(id: u64) -> Listing {
    Listing {
        id,
        make: Some("Nissan".into()),
        model: Some("Patrol".into()),
        year: Some(2023),
        price: Some(310_000.0),
        city: Some("Riyadh".into()),
        images: vec![],
        inspection_report: true,
        owner_id: Some(id * 100),
    }
}

fn harness() -> Harness {
    let config = AdsConfig::default();
    let store = Arc::new(MemoryStore::new());
    let campaign_id = store.seed_demo_data(&[1, 2]).unwrap();
    let account_id = store.get_campaign(campaign_id).unwrap().account_id;
    let wallet_id = store.wallet_for_account(account_id).unwrap().id;

    let signer = Arc::new(TokenSigner::with_secret(b"e2e-secret", 600));
    let listings = Arc::new(ListingCache::new(
        Arc::new(StaticListingProvider::with_listings([listing(1), listing(2)])),
        None,
        60,
    ));
    let ledger = Arc::new(WalletLedger::new(store.clone(), "SAR"));
    let fraud = FraudEngine::new(config.anti_fraud.clone(), Arc::new(MemoryRateCounter::new()));

    Harness {
        serving: ServingOrchestrator::new(store.clone(), listings, signer.clone(), &config),
        tracking: TrackingOrchestrator::new(store.clone(), ledger.clone(), fraud, signer, &config),
        store,
        ledger,
        campaign_id,
        wallet_id,
    }
}

fn serve_ctx(session: &str) -> ServeContext {
    let mut ctx = ServeContext::new(Placement::SearchListings, session);
    ctx.user_type = Some(UserType::VerifiedBuyer);
    ctx
}

fn track_ctx(session: &str, ip: &str) -> TrackContext {
    TrackContext {
        session_id: session.into(),
        user_id: None,
        ip: Some(ip.into()),
        user_agent: Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)".into()),
        position: None,
    }
}

fn request(ad: &ServedAd, signal: EventSignal, ctx: TrackContext) -> TrackRequest {
    TrackRequest {
        tracking_token: ad.tracking_token.clone(),
        signal,
        context: ctx,
    }
}

fn visible() -> EventSignal {
    EventSignal::Impression(ViewportMetrics {
        viewport_seconds: 2.0,
        visible_ratio: 0.8,
    })
}

fn balance(h: &Harness) -> f64 {
    h.ledger.wallet(h.wallet_id).unwrap().balance_available
}

fn stat_key(h: &Harness, ad: &ServedAd) -> DailyStatKey {
    DailyStatKey {
        date: Utc::now().date_naive(),
        campaign_id: h.campaign_id,
        creative_id: ad.creative_id,
        placement: Placement::SearchListings,
    }
}

#[tokio::test]
async fn test_click_is_charged_once_at_placement_median() {
    let h = harness();
    let ads = h.serving.serve(&serve_ctx("s1"), 3).await;
    assert_eq!(ads.len(), 2);
    let ad = &ads[0];

    let outcome = h
        .tracking
        .track(&request(ad, EventSignal::Click, track_ctx("s1", "10.0.0.1")))
        .await;
    assert!(outcome.ok, "{outcome:?}");
    assert!(outcome.is_valid);
    assert_eq!(outcome.charged, 1.5);
    assert!((balance(&h) - 498.5).abs() < 1e-9);

    let stat = h.store.daily_stat(&stat_key(&h, ad)).unwrap();
    assert_eq!(stat.clicks, 1);
    assert!((stat.spend - 1.5).abs() < 1e-9);

    // Same session clicks again inside the cooldown.
    let replay = h
        .tracking
        .track(&request(ad, EventSignal::Click, track_ctx("s1", "10.0.0.1")))
        .await;
    assert!(!replay.ok);
    assert!(!replay.is_valid);
    assert!(replay.reason.is_some());
    assert_eq!(replay.charged, 0.0);
    assert!((balance(&h) - 498.5).abs() < 1e-9);

    // The rejected click is on record but not in the rollup.
    let rejected = h.store.get_event(replay.event_id.unwrap()).unwrap();
    assert!(!rejected.is_valid);
    assert_eq!(h.store.daily_stat(&stat_key(&h, ad)).unwrap().clicks, 1);
    h.ledger.verify_wallet(h.wallet_id).unwrap();
}

#[tokio::test]
async fn test_impressions_under_cpc_are_free_and_counted() {
    let h = harness();
    let ad = h.serving.serve(&serve_ctx("s2"), 1).await.remove(0);

    let outcome = h
        .tracking
        .track(&request(&ad, visible(), track_ctx("s2", "10.0.0.2")))
        .await;
    assert!(outcome.ok);
    assert_eq!(outcome.charged, 0.0);
    assert!(outcome.transaction_id.is_none());
    assert_eq!(h.store.daily_stat(&stat_key(&h, &ad)).unwrap().impressions, 1);

    let glance = EventSignal::Impression(ViewportMetrics {
        viewport_seconds: 0.3,
        visible_ratio: 0.9,
    });
    let outcome = h
        .tracking
        .track(&request(&ad, glance, track_ctx("s2", "10.0.0.2")))
        .await;
    assert!(!outcome.ok);
    assert!(outcome.reason.is_some());
}

#[tokio::test]
async fn test_cpm_impression_micro_charge() {
    let h = harness();
    h.store
        .update_campaign(h.campaign_id, &mut |c| {
            c.pricing_model = PricingModel::Cpm;
            Ok(())
        })
        .unwrap();
    let ad = h.serving.serve(&serve_ctx("s3"), 1).await.remove(0);

    let outcome = h
        .tracking
        .track(&request(&ad, visible(), track_ctx("s3", "10.0.0.3")))
        .await;
    assert!(outcome.ok);
    assert!((outcome.charged - 0.015).abs() < 1e-12);
    assert!((balance(&h) - 499.985).abs() < 1e-9);

    // Clicks are not billed under CPM.
    let click = h
        .tracking
        .track(&request(&ad, EventSignal::Click, track_ctx("s3", "10.0.0.3")))
        .await;
    assert!(click.ok);
    assert_eq!(click.charged, 0.0);
}

#[tokio::test]
async fn test_mark_fraudulent_refunds_and_reverses_rollup() {
    let h = harness();
    let ad = h.serving.serve(&serve_ctx("s4"), 1).await.remove(0);
    let outcome = h
        .tracking
        .track(&request(&ad, EventSignal::Click, track_ctx("s4", "10.0.0.4")))
        .await;
    let event_id = outcome.event_id.unwrap();

    let result = h.tracking.mark_fraudulent(event_id, "click_farm").unwrap();
    assert!(result.changed);
    assert!((result.refunded - 1.5).abs() < 1e-9);
    assert!(result.refund_transaction_id.is_some());

    assert!((balance(&h) - 500.0).abs() < 1e-9);
    let campaign = h.store.get_campaign(h.campaign_id).unwrap();
    assert!(campaign.daily_spent.abs() < 1e-9);
    let event = h.store.get_event(event_id).unwrap();
    assert!(!event.is_valid);
    assert_eq!(event.invalid_reason.as_deref(), Some("click_farm"));
    let stat = h.store.daily_stat(&stat_key(&h, &ad)).unwrap();
    assert_eq!(stat.clicks, 0);
    assert!(stat.spend.abs() < 1e-9);

    // Second reclassification changes nothing.
    let again = h.tracking.mark_fraudulent(event_id, "click_farm").unwrap();
    assert!(!again.changed);
    assert!((balance(&h) - 500.0).abs() < 1e-9);
    h.ledger.verify_wallet(h.wallet_id).unwrap();
}

#[tokio::test]
async fn test_budget_exhaustion_stops_serving() {
    let h = harness();
    let ad = h.serving.serve(&serve_ctx("s5"), 1).await.remove(0);
    h.store
        .update_campaign(h.campaign_id, &mut |c| {
            c.daily_spent = 99.0;
            Ok(())
        })
        .unwrap();

    let outcome = h
        .tracking
        .track(&request(&ad, EventSignal::Click, track_ctx("s5", "10.0.0.5")))
        .await;
    assert!(!outcome.ok);
    assert!(outcome.error.is_some());
    assert!((balance(&h) - 500.0).abs() < 1e-9);
    assert_eq!(
        h.store.get_campaign(h.campaign_id).unwrap().status,
        CampaignStatus::BudgetExhausted
    );
    assert!(h.serving.serve(&serve_ctx("s5"), 3).await.is_empty());
}

#[tokio::test]
async fn test_expired_token_and_anonymous_lead_rejected() {
    let h = harness();
    let ad = h.serving.serve(&serve_ctx("s6"), 1).await.remove(0);

    let late = Utc::now() + Duration::seconds(601);
    let expired = h
        .tracking
        .track_at(&request(&ad, EventSignal::Click, track_ctx("s6", "10.0.0.6")), late)
        .await;
    assert!(!expired.ok);
    assert!(expired.event_id.is_none());

    let lead = h
        .tracking
        .track(&request(&ad, EventSignal::Lead, track_ctx("s6", "10.0.0.6")))
        .await;
    assert!(!lead.ok);
    assert!(lead.reason.is_some());

    let mut signed_in = track_ctx("s6", "10.0.0.6");
    signed_in.user_id = Some("user-77".into());
    let lead = h
        .tracking
        .track(&request(&ad, EventSignal::Lead, signed_in))
        .await;
    assert!(lead.ok);
    assert_eq!(lead.charged, 0.0);
}

#[tokio::test]
async fn test_concurrent_tracks_never_overdraw() {
    let h = Arc::new(harness());
    // Leave room for exactly two clicks in the wallet.
    let spend_down = h.ledger.wallet(h.wallet_id).unwrap().balance_available - 3.0;
    h.ledger.adjust(h.wallet_id, -spend_down, "test setup").unwrap();
    let ads = h.serving.serve(&serve_ctx("s7"), 2).await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let h = h.clone();
        let ad = ads[i % ads.len()].clone();
        tasks.push(tokio::spawn(async move {
            h.tracking
                .track(&request(
                    &ad,
                    EventSignal::Click,
                    track_ctx(&format!("burst-{i}"), &format!("10.1.0.{i}")),
                ))
                .await
        }));
    }
    let mut charged = 0;
    for task in tasks {
        if task.await.unwrap().ok {
            charged += 1;
        }
    }

    assert_eq!(charged, 2);
    assert!(balance(&h).abs() < 1e-9);
    h.ledger.verify_wallet(h.wallet_id).unwrap();
}
