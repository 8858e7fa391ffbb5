//! Track pipeline: token → anti-fraud → charge → persist → rollup.
//!
//! Rejected signals are persisted as invalid events for audit and never
//! billed. Charges carry the event id, so a retried track cannot bill the
//! same event twice.

use chrono::{DateTime, Utc};
use motorads_billing::{ChargeRequest, WalletLedger};
use motorads_core::config::{AdsConfig, MedianBidsConfig};
use motorads_core::fingerprint::{session_hash, sha256_hex};
use motorads_core::types::{
    AdEvent, DailyStatKey, EventKind, EventSignal, Placement, PricingModel, StatDelta,
    TrackContext,
};
use motorads_core::{AdsError, AdsResult};
use motorads_fraud::{FraudContext, FraudEngine, Verdict};
use motorads_serving::{TokenPayload, TokenSigner};
use motorads_store::{AdStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub tracking_token: String,
    pub signal: EventSignal,
    pub context: TrackContext,
}

/// Result of one track call. Fraud and budget outcomes are reported here,
/// never as errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackOutcome {
    pub ok: bool,
    pub charged: f64,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrackOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reclassification {
    pub event_id: Uuid,
    /// False when the event was already invalid; nothing changed.
    pub changed: bool,
    pub refunded: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_transaction_id: Option<Uuid>,
}

pub struct TrackingOrchestrator {
    store: Arc<dyn AdStore>,
    ledger: Arc<WalletLedger>,
    fraud: FraudEngine,
    signer: Arc<TokenSigner>,
    median_bids: MedianBidsConfig,
}

impl TrackingOrchestrator {
    pub fn new(
        store: Arc<dyn AdStore>,
        ledger: Arc<WalletLedger>,
        fraud: FraudEngine,
        signer: Arc<TokenSigner>,
        config: &AdsConfig,
    ) -> Self {
        info!(currency = ledger.currency(), "Tracking orchestrator initialized");
        Self {
            store,
            ledger,
            fraud,
            signer,
            median_bids: config.median_bids.clone(),
        }
    }

    /// Price of one billable event: the placement's median CPC per click,
    /// median CPM / 1000 per impression. Non-billable combinations cost 0.
    pub fn cost_for(&self, pricing: PricingModel, kind: EventKind, placement: Placement) -> f64 {
        if !kind.is_billable_under(pricing) {
            return 0.0;
        }
        let median = self.median_bids.for_placement(placement);
        match pricing {
            PricingModel::Cpc => median.cpc,
            PricingModel::Cpm => median.cpm / 1000.0,
        }
    }

    pub async fn track(&self, req: &TrackRequest) -> TrackOutcome {
        self.track_at(req, Utc::now()).await
    }

    pub async fn track_at(&self, req: &TrackRequest, now: DateTime<Utc>) -> TrackOutcome {
        let kind = req.signal.kind();
        metrics::counter!("track.events", "event" => kind.as_str()).increment(1);

        let payload = match self.signer.validate_at(&req.tracking_token, now) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::counter!("track.rejected", "reason" => "invalid_token").increment(1);
                debug!(error = %e, "Tracking token rejected");
                return TrackOutcome::failed("Invalid or expired token");
            }
        };

        let creative = self
            .store
            .get_creative(payload.creative_id)
            .filter(|c| c.campaign_id == payload.campaign_id);
        let campaign = self.store.get_campaign(payload.campaign_id);
        let (Some(_), Some(campaign)) = (creative, campaign) else {
            metrics::counter!("track.rejected", "reason" => "not_found").increment(1);
            return TrackOutcome::failed("Creative or campaign not found");
        };

        let session = session_hash(&req.context.session_id);
        let fraud_ctx = FraudContext {
            session_hash: &session,
            user_id: req.context.user_id.as_deref(),
            ip: req.context.ip.as_deref(),
            user_agent: req.context.user_agent.as_deref(),
        };
        let event_id = Uuid::new_v4();

        if let Verdict::Reject(reason) = self
            .fraud
            .validate_event(&req.signal, &fraud_ctx, payload.creative_id, now)
            .await
        {
            metrics::counter!("track.rejected", "reason" => reason.as_str()).increment(1);
            let mut event = self.build_event(event_id, &payload, req, &session, 0.0, None, now);
            event.is_valid = false;
            event.invalid_reason = Some(reason.as_str().to_string());
            if let Err(e) = self.store.insert_event(event) {
                warn!(event_id = %event_id, error = %e, "Failed to record rejected event");
            }
            return TrackOutcome {
                event_id: Some(event_id),
                reason: Some(reason.to_string()),
                ..TrackOutcome::default()
            };
        }

        let cost = self.cost_for(campaign.pricing_model, kind, payload.placement);
        let mut transaction_id = None;
        if cost > 0.0 {
            let charge = ChargeRequest {
                campaign_id: campaign.id,
                amount: cost,
                kind,
                creative_id: payload.creative_id,
                event_id: Some(event_id),
            };
            match self.ledger.charge(&charge) {
                Ok(receipt) => transaction_id = Some(receipt.transaction_id),
                Err(e) => {
                    metrics::counter!("track.rejected", "reason" => "charge_failed").increment(1);
                    return TrackOutcome::failed(e.to_string());
                }
            }
        }

        let event = self.build_event(event_id, &payload, req, &session, cost, transaction_id, now);
        if let Err(e) = self.store.insert_event(event) {
            error!(event_id = %event_id, error = %e, "Failed to persist tracked event");
            if let Some(tx) = transaction_id {
                if let Err(refund_err) = self.ledger.refund(tx, "event_persist_failed") {
                    error!(transaction_id = %tx, error = %refund_err, "Compensating refund failed");
                }
            }
            return TrackOutcome::failed("Failed to record event");
        }

        self.store.upsert_daily_stat(
            DailyStatKey {
                date: now.date_naive(),
                campaign_id: payload.campaign_id,
                creative_id: payload.creative_id,
                placement: payload.placement,
            },
            StatDelta::for_event(kind, cost),
        );

        debug!(
            event_id = %event_id,
            creative_id = %payload.creative_id,
            event = kind.as_str(),
            charged = cost,
            "Event tracked"
        );
        TrackOutcome {
            ok: true,
            charged: cost,
            is_valid: true,
            event_id: Some(event_id),
            transaction_id,
            ..TrackOutcome::default()
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_event(
        &self,
        id: Uuid,
        payload: &TokenPayload,
        req: &TrackRequest,
        session: &str,
        cost: f64,
        transaction_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AdEvent {
        AdEvent {
            id,
            campaign_id: payload.campaign_id,
            creative_id: payload.creative_id,
            placement: payload.placement,
            position: req
                .context
                .position
                .clone()
                .or_else(|| payload.position.clone()),
            kind: req.signal.kind(),
            cost_charged: cost,
            currency: self.ledger.currency().to_string(),
            user_id: req.context.user_id.clone(),
            session_hash: session.to_string(),
            ip_hash: req.context.ip.as_deref().map(sha256_hex),
            user_agent_hash: req.context.user_agent.as_deref().map(sha256_hex),
            viewport: req.signal.viewport(),
            transaction_id,
            served_at: payload.served_at,
            created_at: now,
            is_valid: true,
            invalid_reason: None,
        }
    }

    // ─── Fraud reclassification ─────────────────────────────────────────

    /// Flip a valid event to invalid, refund its charge and take it back
    /// out of the daily rollup. Calling it again is a no-op.
    pub fn mark_fraudulent(&self, event_id: Uuid, reason: &str) -> AdsResult<Reclassification> {
        let event = self
            .store
            .get_event(event_id)
            .ok_or_else(|| AdsError::not_found("event", event_id))?;
        if !event.is_valid {
            return Ok(Reclassification {
                event_id,
                changed: false,
                refunded: 0.0,
                refund_transaction_id: None,
            });
        }

        // Refund before flipping: a failed refund leaves the event untouched.
        let refund = match event.transaction_id {
            Some(tx) => Some(self.ledger.refund(tx, reason)?),
            None => None,
        };

        let flipped = self.store.update_event(event_id, &mut |e| {
            if !e.is_valid {
                return Err(StoreError::Conflict(format!("event {event_id} already invalid")));
            }
            e.is_valid = false;
            e.invalid_reason = Some(reason.to_string());
            Ok(())
        });
        match flipped {
            Ok(_) => {}
            Err(StoreError::Conflict(_)) => {
                return Ok(Reclassification {
                    event_id,
                    changed: false,
                    refunded: 0.0,
                    refund_transaction_id: None,
                })
            }
            Err(e) => return Err(e.into()),
        }

        self.store.upsert_daily_stat(
            DailyStatKey {
                date: event.created_at.date_naive(),
                campaign_id: event.campaign_id,
                creative_id: event.creative_id,
                placement: event.placement,
            },
            StatDelta::for_event(event.kind, event.cost_charged).negated(),
        );

        metrics::counter!("track.reclassified").increment(1);
        info!(
            event_id = %event_id,
            reason,
            refunded = event.cost_charged,
            "Event reclassified as fraudulent"
        );
        Ok(Reclassification {
            event_id,
            changed: true,
            refunded: refund.as_ref().map_or(0.0, |tx| tx.amount),
            refund_transaction_id: refund.map(|tx| tx.id),
        })
    }
}
