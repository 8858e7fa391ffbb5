//! In-memory store backed by DashMap.
//!
//! Production: replace with PostgreSQL or a similar ACID store exposing the
//! same `AdStore` surface. Ledger writes are serialized by a single mutex,
//! standing in for the row locks a relational store would take.

use crate::{AdStore, CampaignUpdate, LedgerWrite, StoreError, StoreResult, TransactionFilter};
use chrono::{Duration, NaiveDate, Utc};
use dashmap::DashMap;
use motorads_core::targeting::TargetingSpec;
use motorads_core::types::{
    AdEvent, Campaign, CampaignObjective, CampaignStatus, Creative, CreativeStatus, CtrHistory,
    DailyStat, DailyStatKey, EventKind, ListingId, Placement, PricingModel, StatDelta,
    TransactionKind, Viewer, Wallet, WalletTransaction,
};
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

/// Rounding slack for balance comparisons.
const EPSILON: f64 = 1e-9;

pub struct MemoryStore {
    campaigns: DashMap<Uuid, Campaign>,
    creatives: DashMap<Uuid, Creative>,
    wallets: DashMap<Uuid, Wallet>,
    wallet_by_account: DashMap<Uuid, Uuid>,
    transactions: DashMap<Uuid, WalletTransaction>,
    wallet_transactions: DashMap<Uuid, Vec<Uuid>>,
    spend_by_event: DashMap<Uuid, Uuid>,
    refund_by_spend: DashMap<Uuid, Uuid>,
    events: DashMap<Uuid, AdEvent>,
    daily_stats: DashMap<DailyStatKey, DailyStat>,
    ledger_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Ad store initialized (in-memory, development mode)");
        Self {
            campaigns: DashMap::new(),
            creatives: DashMap::new(),
            wallets: DashMap::new(),
            wallet_by_account: DashMap::new(),
            transactions: DashMap::new(),
            wallet_transactions: DashMap::new(),
            spend_by_event: DashMap::new(),
            refund_by_spend: DashMap::new(),
            events: DashMap::new(),
            daily_stats: DashMap::new(),
            ledger_lock: Mutex::new(()),
        }
    }

    /// Seed one funded account with an active CPC campaign promoting
    /// `listing_ids`. Returns the campaign id.
    pub fn seed_demo_data(&self, listing_ids: &[ListingId]) -> StoreResult<Uuid> {
        let now = Utc::now();
        let account_id = Uuid::new_v4();
        let wallet = Wallet {
            id: Uuid::new_v4(),
            account_id,
            balance_available: 0.0,
            balance_hold: 0.0,
            lifetime_spent: 0.0,
            updated_at: now,
        };
        let wallet_id = wallet.id;
        self.insert_wallet(wallet)?;
        self.commit_ledger(LedgerWrite {
            available_delta: 500.0,
            hold_delta: 0.0,
            lifetime_spent_delta: 0.0,
            campaign: None,
            transaction: WalletTransaction {
                id: Uuid::new_v4(),
                wallet_id,
                kind: TransactionKind::Topup,
                amount: 500.0,
                currency: "SAR".to_string(),
                related_campaign_id: None,
                related_event_id: None,
                related_payment_ref: Some("demo-seed".to_string()),
                original_transaction_id: None,
                meta: serde_json::json!({}),
                created_at: now,
            },
        })?;

        let campaign = Campaign {
            id: Uuid::new_v4(),
            account_id,
            name: "Demo sponsored listings".to_string(),
            objective: CampaignObjective::Traffic,
            pricing_model: PricingModel::Cpc,
            status: CampaignStatus::Active,
            daily_budget: 100.0,
            daily_spent: 0.0,
            total_budget: None,
            total_spent: 0.0,
            start_at: Some(now - Duration::days(1)),
            end_at: Some(now + Duration::days(30)),
            targeting: TargetingSpec::default().normalize(),
            created_at: now,
            updated_at: now,
        };
        let campaign_id = campaign.id;
        self.insert_campaign(campaign)?;

        for (i, listing_id) in listing_ids.iter().enumerate() {
            self.insert_creative(Creative {
                id: Uuid::new_v4(),
                campaign_id,
                listing_id: *listing_id,
                headline: None,
                subtitle: None,
                cta: Some("View car".to_string()),
                status: CreativeStatus::Approved,
                rejected_reason: None,
                created_at: now + Duration::milliseconds(i as i64),
                updated_at: now,
            })?;
        }

        info!(
            campaign_id = %campaign_id,
            creatives = listing_ids.len(),
            "Seeded demo campaign"
        );
        Ok(campaign_id)
    }
}

fn clamp_zero(v: f64) -> f64 {
    if v < 0.0 {
        0.0
    } else {
        v
    }
}

fn apply_count(current: u64, delta: i64) -> u64 {
    u64::try_from((current as i64).saturating_add(delta)).unwrap_or(0)
}

impl AdStore for MemoryStore {
    // ─── Campaigns & creatives ─────────────────────────────────────────────

    fn insert_campaign(&self, campaign: Campaign) -> StoreResult<()> {
        if self.campaigns.contains_key(&campaign.id) {
            return Err(StoreError::Conflict(format!("campaign {} exists", campaign.id)));
        }
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|r| r.value().clone())
    }

    fn list_campaigns(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    fn update_campaign(&self, id: Uuid, update: CampaignUpdate<'_>) -> StoreResult<Campaign> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "campaign", id })?;
        let mut draft = entry.value().clone();
        update(&mut draft)?;
        draft.updated_at = Utc::now();
        *entry.value_mut() = draft.clone();
        Ok(draft)
    }

    fn reset_daily_spend(&self) -> usize {
        let _guard = self.ledger_lock.lock();
        let mut reset = 0;
        for mut entry in self.campaigns.iter_mut() {
            if entry.daily_spent != 0.0 {
                entry.daily_spent = 0.0;
                reset += 1;
            }
        }
        reset
    }

    fn insert_creative(&self, creative: Creative) -> StoreResult<()> {
        if !self.campaigns.contains_key(&creative.campaign_id) {
            return Err(StoreError::NotFound {
                entity: "campaign",
                id: creative.campaign_id,
            });
        }
        self.creatives.insert(creative.id, creative);
        Ok(())
    }

    fn get_creative(&self, id: Uuid) -> Option<Creative> {
        self.creatives.get(&id).map(|r| r.value().clone())
    }

    fn creatives_for_campaign(&self, campaign_id: Uuid) -> Vec<Creative> {
        let mut creatives: Vec<Creative> = self
            .creatives
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| r.value().clone())
            .collect();
        creatives.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        creatives
    }

    fn update_creative(
        &self,
        id: Uuid,
        update: &mut dyn FnMut(&mut Creative) -> StoreResult<()>,
    ) -> StoreResult<Creative> {
        let mut entry = self
            .creatives
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "creative", id })?;
        let mut draft = entry.value().clone();
        update(&mut draft)?;
        draft.updated_at = Utc::now();
        *entry.value_mut() = draft.clone();
        Ok(draft)
    }

    fn servable_creatives(&self) -> Vec<(Creative, Campaign)> {
        let creatives: Vec<Creative> = self
            .creatives
            .iter()
            .filter(|r| r.status == CreativeStatus::Approved)
            .map(|r| r.value().clone())
            .collect();

        let mut servable: Vec<(Creative, Campaign)> = creatives
            .into_iter()
            .filter_map(|creative| {
                let campaign = self.get_campaign(creative.campaign_id)?;
                (campaign.status == CampaignStatus::Active).then_some((creative, campaign))
            })
            .collect();
        servable.sort_by(|(a, _), (b, _)| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        servable
    }

    // ─── Wallets & ledger ──────────────────────────────────────────────────

    fn insert_wallet(&self, wallet: Wallet) -> StoreResult<()> {
        if self.wallet_by_account.contains_key(&wallet.account_id) {
            return Err(StoreError::Conflict(format!(
                "account {} already has a wallet",
                wallet.account_id
            )));
        }
        if wallet.balance_available != 0.0 || wallet.balance_hold != 0.0 {
            // Balances only move through the ledger.
            return Err(StoreError::Conflict(
                "new wallets must start at zero balance".to_string(),
            ));
        }
        self.wallet_by_account.insert(wallet.account_id, wallet.id);
        self.wallets.insert(wallet.id, wallet);
        Ok(())
    }

    fn get_wallet(&self, id: Uuid) -> Option<Wallet> {
        self.wallets.get(&id).map(|r| r.value().clone())
    }

    fn wallet_for_account(&self, account_id: Uuid) -> Option<Wallet> {
        let wallet_id = *self.wallet_by_account.get(&account_id)?;
        self.get_wallet(wallet_id)
    }

    fn commit_ledger(&self, write: LedgerWrite) -> StoreResult<Wallet> {
        let _guard = self.ledger_lock.lock();
        let tx = write.transaction.clone();

        let wallet = self.get_wallet(tx.wallet_id).ok_or(StoreError::NotFound {
            entity: "wallet",
            id: tx.wallet_id,
        })?;

        if self.transactions.contains_key(&tx.id) {
            return Err(StoreError::Conflict(format!("transaction {} exists", tx.id)));
        }
        if tx.kind == TransactionKind::Spend {
            if let Some(event_id) = tx.related_event_id {
                if self.spend_by_event.contains_key(&event_id) {
                    return Err(StoreError::Conflict(format!(
                        "event {event_id} already charged"
                    )));
                }
            }
        }
        if tx.kind == TransactionKind::Refund {
            if let Some(spend_id) = tx.original_transaction_id {
                if self.refund_by_spend.contains_key(&spend_id) {
                    return Err(StoreError::Conflict(format!(
                        "transaction {spend_id} already refunded"
                    )));
                }
            }
        }

        let available = wallet.balance_available + write.available_delta;
        if available < -EPSILON {
            return Err(StoreError::InsufficientBalance {
                wallet_id: wallet.id,
                available: wallet.balance_available,
                required: -write.available_delta,
            });
        }
        let hold = wallet.balance_hold + write.hold_delta;
        if hold < -EPSILON {
            return Err(StoreError::InsufficientBalance {
                wallet_id: wallet.id,
                available: wallet.balance_hold,
                required: -write.hold_delta,
            });
        }

        if let Some(delta) = write.campaign {
            let campaign = self.get_campaign(delta.campaign_id).ok_or(StoreError::NotFound {
                entity: "campaign",
                id: delta.campaign_id,
            })?;
            if delta.daily > 0.0 && campaign.daily_spent + delta.daily > campaign.daily_budget + EPSILON {
                return Err(StoreError::BudgetExceeded {
                    campaign_id: campaign.id,
                });
            }
            if delta.total > 0.0
                && campaign
                    .total_budget
                    .is_some_and(|total| campaign.total_spent + delta.total > total + EPSILON)
            {
                return Err(StoreError::BudgetExceeded {
                    campaign_id: campaign.id,
                });
            }
        }

        // All checks passed; apply every part of the write.
        let now = Utc::now();
        let updated = {
            let mut entry = self
                .wallets
                .get_mut(&wallet.id)
                .ok_or(StoreError::NotFound { entity: "wallet", id: wallet.id })?;
            let w = entry.value_mut();
            w.balance_available = clamp_zero(available);
            w.balance_hold = clamp_zero(hold);
            w.lifetime_spent = clamp_zero(w.lifetime_spent + write.lifetime_spent_delta);
            w.updated_at = now;
            w.clone()
        };

        if let Some(delta) = write.campaign {
            if let Some(mut c) = self.campaigns.get_mut(&delta.campaign_id) {
                c.daily_spent = clamp_zero(c.daily_spent + delta.daily);
                c.total_spent = clamp_zero(c.total_spent + delta.total);
                c.updated_at = now;
            }
        }

        if tx.kind == TransactionKind::Spend {
            if let Some(event_id) = tx.related_event_id {
                self.spend_by_event.insert(event_id, tx.id);
            }
        }
        if tx.kind == TransactionKind::Refund {
            if let Some(spend_id) = tx.original_transaction_id {
                self.refund_by_spend.insert(spend_id, tx.id);
            }
        }
        self.wallet_transactions
            .entry(tx.wallet_id)
            .or_default()
            .push(tx.id);
        self.transactions.insert(tx.id, tx);

        Ok(updated)
    }

    fn get_transaction(&self, id: Uuid) -> Option<WalletTransaction> {
        self.transactions.get(&id).map(|r| r.value().clone())
    }

    fn transactions(&self, wallet_id: Uuid, filter: &TransactionFilter) -> Vec<WalletTransaction> {
        let ids: Vec<Uuid> = self
            .wallet_transactions
            .get(&wallet_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .rev()
            .filter_map(|id| self.get_transaction(*id))
            .filter(|tx| filter.accepts(tx))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn spend_for_event(&self, event_id: Uuid) -> Option<WalletTransaction> {
        let tx_id = *self.spend_by_event.get(&event_id)?;
        self.get_transaction(tx_id)
    }

    fn refund_of(&self, spend_id: Uuid) -> Option<WalletTransaction> {
        let tx_id = *self.refund_by_spend.get(&spend_id)?;
        self.get_transaction(tx_id)
    }

    // ─── Events & rollups ──────────────────────────────────────────────────

    fn insert_event(&self, event: AdEvent) -> StoreResult<()> {
        if self.events.contains_key(&event.id) {
            return Err(StoreError::Conflict(format!("event {} exists", event.id)));
        }
        self.events.insert(event.id, event);
        Ok(())
    }

    fn get_event(&self, id: Uuid) -> Option<AdEvent> {
        self.events.get(&id).map(|r| r.value().clone())
    }

    fn update_event(
        &self,
        id: Uuid,
        update: &mut dyn FnMut(&mut AdEvent) -> StoreResult<()>,
    ) -> StoreResult<AdEvent> {
        let mut entry = self
            .events
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "event", id })?;
        let mut draft = entry.value().clone();
        update(&mut draft)?;
        *entry.value_mut() = draft.clone();
        Ok(draft)
    }

    fn count_impressions(&self, viewer: &Viewer, creative_id: Uuid, date: NaiveDate) -> u64 {
        self.events
            .iter()
            .filter(|e| {
                e.kind == EventKind::Impression
                    && e.creative_id == creative_id
                    && e.created_at.date_naive() == date
                    && viewer.matches(e.value())
            })
            .count() as u64
    }

    fn upsert_daily_stat(&self, key: DailyStatKey, delta: StatDelta) -> DailyStat {
        let now = Utc::now();
        let mut entry = self.daily_stats.entry(key).or_insert_with(|| DailyStat {
            key,
            impressions: 0,
            clicks: 0,
            leads: 0,
            spend: 0.0,
            updated_at: now,
        });
        let stat = entry.value_mut();
        stat.impressions = apply_count(stat.impressions, delta.impressions);
        stat.clicks = apply_count(stat.clicks, delta.clicks);
        stat.leads = apply_count(stat.leads, delta.leads);
        stat.spend = clamp_zero(stat.spend + delta.spend);
        stat.updated_at = now;
        stat.clone()
    }

    fn daily_stat(&self, key: &DailyStatKey) -> Option<DailyStat> {
        self.daily_stats.get(key).map(|r| r.value().clone())
    }

    fn ctr_history(&self, creative_id: Uuid, placement: Placement) -> CtrHistory {
        self.daily_stats
            .iter()
            .filter(|s| s.key.creative_id == creative_id && s.key.placement == placement)
            .fold(CtrHistory::default(), |mut acc, s| {
                acc.impressions += s.impressions;
                acc.clicks += s.clicks;
                acc
            })
    }
}
