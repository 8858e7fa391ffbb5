//! Wallet ledger: every balance mutation is a single atomic store write
//! paired with an append-only transaction row.
//!
//! Charges and refunds for one wallet are serialized through a per-wallet
//! lock, so two concurrent charges can never both pass a balance check that
//! only one of them should pass. The store re-checks the same invariants
//! inside its own write, which keeps multi-process deployments honest too.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use motorads_core::lifecycle;
use motorads_core::types::{
    Campaign, CampaignStatus, EventKind, TransactionKind, Wallet, WalletTransaction,
};
use motorads_store::{
    AdStore, CampaignSpendDelta, LedgerWrite, StoreError, TransactionFilter,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Balances are money in the wallet currency; comparisons tolerate float noise.
const EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a charge did not go through. Budget and balance failures also move an
/// active campaign to `budget_exhausted`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChargeError {
    #[error("invalid charge amount {0}")]
    InvalidAmount(f64),

    #[error("campaign not found")]
    CampaignNotFound,

    #[error("wallet not found")]
    WalletNotFound,

    #[error("insufficient daily budget: {remaining:.4} remaining, {amount:.4} required")]
    InsufficientDailyBudget { remaining: f64, amount: f64 },

    #[error("insufficient wallet balance: {available:.4} available, {amount:.4} required")]
    InsufficientBalance { available: f64, amount: f64 },

    #[error("total budget exhausted")]
    TotalBudgetExhausted,

    #[error(transparent)]
    Store(StoreError),
}

impl ChargeError {
    fn exhausts_budget(&self) -> bool {
        matches!(
            self,
            Self::InsufficientDailyBudget { .. }
                | Self::InsufficientBalance { .. }
                | Self::TotalBudgetExhausted
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("amount must be positive and finite, got {0}")]
    InvalidAmount(f64),

    #[error("transaction {0} is not a spend")]
    NotASpend(Uuid),

    #[error("transaction {0} already refunded")]
    AlreadyRefunded(Uuid),

    #[error("insufficient funds: {available:.4} available, {required:.4} required")]
    InsufficientFunds { available: f64, required: f64 },

    #[error("wallet {wallet_id} balance {balance:.4} does not match ledger sum {ledger:.4}")]
    Mismatch {
        wallet_id: Uuid,
        balance: f64,
        ledger: f64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for motorads_core::AdsError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound { entity, id } => Self::not_found(entity, id),
            LedgerError::InvalidAmount(_) => Self::Validation(e.to_string()),
            other => Self::Store(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests & receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub campaign_id: Uuid,
    pub amount: f64,
    pub kind: EventKind,
    pub creative_id: Uuid,
    /// Charges that carry an event id are idempotent per event.
    pub event_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub transaction_id: Uuid,
    pub amount: f64,
    pub balance_after: f64,
    /// The event had already been charged; no money moved this time.
    pub replayed: bool,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct WalletLedger {
    store: Arc<dyn AdStore>,
    currency: String,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn AdStore>, currency: impl Into<String>) -> Self {
        let currency = currency.into();
        info!(currency = %currency, "Wallet ledger initialized");
        Self {
            store,
            currency,
            locks: DashMap::new(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    fn wallet_lock(&self, wallet_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn new_transaction(&self, wallet_id: Uuid, kind: TransactionKind, amount: f64) -> WalletTransaction {
        WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id,
            kind,
            amount,
            currency: self.currency.clone(),
            related_campaign_id: None,
            related_event_id: None,
            related_payment_ref: None,
            original_transaction_id: None,
            meta: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    // ── Charge ──────────────────────────────────────────────────────────

    /// Debit the campaign's wallet and its spend counters in one step.
    ///
    /// Checks run in order: wallet exists, daily remaining budget, wallet
    /// balance, then total budget. Any budget or balance failure moves an
    /// active campaign to `budget_exhausted` before the error is returned.
    pub fn charge(&self, req: &ChargeRequest) -> Result<ChargeReceipt, ChargeError> {
        if !req.amount.is_finite() || req.amount <= 0.0 {
            return Err(ChargeError::InvalidAmount(req.amount));
        }
        let campaign = self
            .store
            .get_campaign(req.campaign_id)
            .ok_or(ChargeError::CampaignNotFound)?;
        let wallet = self
            .store
            .wallet_for_account(campaign.account_id)
            .ok_or(ChargeError::WalletNotFound)?;

        let lock = self.wallet_lock(wallet.id);
        let _guard = lock.lock();

        let result = self.charge_locked(req, wallet.id);
        match &result {
            Ok(receipt) if !receipt.replayed => {
                metrics::counter!("ledger.charges", "event" => req.kind.as_str()).increment(1);
                info!(
                    campaign_id = %req.campaign_id,
                    creative_id = %req.creative_id,
                    transaction_id = %receipt.transaction_id,
                    amount = req.amount,
                    "Charge applied"
                );
            }
            Ok(_) => {}
            Err(e) => {
                metrics::counter!("ledger.charge_failures").increment(1);
                warn!(campaign_id = %req.campaign_id, error = %e, "Charge failed");
                if e.exhausts_budget() {
                    self.exhaust(req.campaign_id);
                }
            }
        }
        result
    }

    fn charge_locked(&self, req: &ChargeRequest, wallet_id: Uuid) -> Result<ChargeReceipt, ChargeError> {
        // Re-read under the lock; the earlier reads only located the wallet.
        let wallet = self
            .store
            .get_wallet(wallet_id)
            .ok_or(ChargeError::WalletNotFound)?;
        let campaign = self
            .store
            .get_campaign(req.campaign_id)
            .ok_or(ChargeError::CampaignNotFound)?;

        if let Some(event_id) = req.event_id {
            if let Some(existing) = self.store.spend_for_event(event_id) {
                return Ok(ChargeReceipt {
                    transaction_id: existing.id,
                    amount: -existing.amount,
                    balance_after: wallet.balance_available,
                    replayed: true,
                });
            }
        }

        precheck(&campaign, &wallet, req.amount)?;

        let mut tx = self.new_transaction(wallet.id, TransactionKind::Spend, -req.amount);
        tx.related_campaign_id = Some(campaign.id);
        tx.related_event_id = req.event_id;
        tx.meta = serde_json::json!({
            "event_type": req.kind.as_str(),
            "creative_id": req.creative_id,
        });
        let transaction_id = tx.id;

        let updated = self
            .store
            .commit_ledger(LedgerWrite {
                available_delta: -req.amount,
                hold_delta: 0.0,
                lifetime_spent_delta: req.amount,
                campaign: Some(CampaignSpendDelta {
                    campaign_id: campaign.id,
                    daily: req.amount,
                    total: req.amount,
                }),
                transaction: tx,
            })
            .map_err(|e| match e {
                StoreError::InsufficientBalance { available, .. } => {
                    ChargeError::InsufficientBalance {
                        available,
                        amount: req.amount,
                    }
                }
                StoreError::BudgetExceeded { .. } => ChargeError::InsufficientDailyBudget {
                    remaining: campaign.daily_remaining(),
                    amount: req.amount,
                },
                other => ChargeError::Store(other),
            })?;

        Ok(ChargeReceipt {
            transaction_id,
            amount: req.amount,
            balance_after: updated.balance_available,
            replayed: false,
        })
    }

    fn exhaust(&self, campaign_id: Uuid) {
        let result = self.store.update_campaign(campaign_id, &mut |c| {
            if c.status == CampaignStatus::Active {
                c.status = lifecycle::transition(c.status, CampaignStatus::BudgetExhausted)
                    .map_err(|e| StoreError::Conflict(e.to_string()))?;
                c.updated_at = Utc::now();
            }
            Ok(())
        });
        match result {
            Ok(c) if c.status == CampaignStatus::BudgetExhausted => {
                metrics::counter!("campaign.budget_exhausted").increment(1);
                info!(campaign_id = %campaign_id, "Campaign budget exhausted");
            }
            Ok(_) => {}
            Err(e) => warn!(campaign_id = %campaign_id, error = %e, "Failed to mark campaign exhausted"),
        }
    }

    // ── Refund ──────────────────────────────────────────────────────────

    /// Reverse a spend exactly once: restore the balance, give the daily and
    /// total spend back to the campaign, and append a refund that references
    /// the original transaction.
    pub fn refund(&self, transaction_id: Uuid, reason: &str) -> Result<WalletTransaction, LedgerError> {
        let original = self
            .store
            .get_transaction(transaction_id)
            .ok_or(LedgerError::NotFound {
                entity: "transaction",
                id: transaction_id,
            })?;
        if original.kind != TransactionKind::Spend {
            return Err(LedgerError::NotASpend(transaction_id));
        }

        let lock = self.wallet_lock(original.wallet_id);
        let _guard = lock.lock();

        if self.store.refund_of(transaction_id).is_some() {
            return Err(LedgerError::AlreadyRefunded(transaction_id));
        }

        let amount = -original.amount;
        let mut tx = self.new_transaction(original.wallet_id, TransactionKind::Refund, amount);
        tx.related_campaign_id = original.related_campaign_id;
        tx.related_event_id = original.related_event_id;
        tx.original_transaction_id = Some(original.id);
        tx.meta = serde_json::json!({ "reason": reason });

        let write = LedgerWrite {
            available_delta: amount,
            hold_delta: 0.0,
            lifetime_spent_delta: -amount,
            campaign: original.related_campaign_id.map(|campaign_id| CampaignSpendDelta {
                campaign_id,
                daily: -amount,
                total: -amount,
            }),
            transaction: tx.clone(),
        };
        self.store.commit_ledger(write).map_err(|e| match e {
            StoreError::Conflict(_) => LedgerError::AlreadyRefunded(transaction_id),
            other => LedgerError::Store(other),
        })?;

        metrics::counter!("ledger.refunds").increment(1);
        info!(
            transaction_id = %transaction_id,
            refund_id = %tx.id,
            amount,
            reason,
            "Spend refunded"
        );
        Ok(tx)
    }

    // ── Funding operations ──────────────────────────────────────────────

    pub fn topup(
        &self,
        wallet_id: Uuid,
        amount: f64,
        payment_ref: Option<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        positive(amount)?;
        let mut tx = self.new_transaction(wallet_id, TransactionKind::Topup, amount);
        tx.related_payment_ref = payment_ref;
        self.commit(wallet_id, amount, 0.0, tx)
    }

    /// Move funds from available to held.
    pub fn hold(
        &self,
        wallet_id: Uuid,
        amount: f64,
        campaign_id: Option<Uuid>,
    ) -> Result<WalletTransaction, LedgerError> {
        positive(amount)?;
        let mut tx = self.new_transaction(wallet_id, TransactionKind::Hold, -amount);
        tx.related_campaign_id = campaign_id;
        self.commit(wallet_id, -amount, amount, tx)
    }

    /// Move held funds back to available.
    pub fn release(
        &self,
        wallet_id: Uuid,
        amount: f64,
        campaign_id: Option<Uuid>,
    ) -> Result<WalletTransaction, LedgerError> {
        positive(amount)?;
        let mut tx = self.new_transaction(wallet_id, TransactionKind::Release, amount);
        tx.related_campaign_id = campaign_id;
        self.commit(wallet_id, amount, -amount, tx)
    }

    /// Manual correction of the available balance; `amount` is signed.
    pub fn adjust(&self, wallet_id: Uuid, amount: f64, reason: &str) -> Result<WalletTransaction, LedgerError> {
        if !amount.is_finite() || amount == 0.0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut tx = self.new_transaction(wallet_id, TransactionKind::Adjustment, amount);
        tx.meta = serde_json::json!({ "reason": reason });
        self.commit(wallet_id, amount, 0.0, tx)
    }

    fn commit(
        &self,
        wallet_id: Uuid,
        available_delta: f64,
        hold_delta: f64,
        tx: WalletTransaction,
    ) -> Result<WalletTransaction, LedgerError> {
        let lock = self.wallet_lock(wallet_id);
        let _guard = lock.lock();

        let wallet = self.wallet(wallet_id)?;
        let kind = tx.kind;
        self.store
            .commit_ledger(LedgerWrite {
                available_delta,
                hold_delta,
                lifetime_spent_delta: 0.0,
                campaign: None,
                transaction: tx.clone(),
            })
            .map_err(|e| match e {
                StoreError::InsufficientBalance { available, required, .. } => {
                    LedgerError::InsufficientFunds { available, required }
                }
                other => LedgerError::Store(other),
            })?;

        info!(
            wallet_id = %wallet.id,
            kind = ?kind,
            amount = tx.amount,
            "Wallet transaction recorded"
        );
        Ok(tx)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn wallet(&self, wallet_id: Uuid) -> Result<Wallet, LedgerError> {
        self.store.get_wallet(wallet_id).ok_or(LedgerError::NotFound {
            entity: "wallet",
            id: wallet_id,
        })
    }

    pub fn transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        self.wallet(wallet_id)?;
        Ok(self.store.transactions(wallet_id, filter))
    }

    /// Signed sum of every transaction on the wallet.
    pub fn reconstruct_balance(&self, wallet_id: Uuid) -> Result<f64, LedgerError> {
        self.wallet(wallet_id)?;
        Ok(self
            .store
            .transactions(wallet_id, &TransactionFilter::default())
            .iter()
            .map(|tx| tx.amount)
            .sum())
    }

    pub fn verify_wallet(&self, wallet_id: Uuid) -> Result<(), LedgerError> {
        let wallet = self.wallet(wallet_id)?;
        let ledger = self.reconstruct_balance(wallet_id)?;
        if (wallet.balance_available - ledger).abs() > 1e-6 {
            return Err(LedgerError::Mismatch {
                wallet_id,
                balance: wallet.balance_available,
                ledger,
            });
        }
        Ok(())
    }

    /// Transactions recorded at or after `since`, for reporting.
    pub fn transactions_since(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        Ok(self
            .transactions(wallet_id, &TransactionFilter::default())?
            .into_iter()
            .filter(|tx| tx.created_at >= since)
            .collect())
    }
}

fn precheck(campaign: &Campaign, wallet: &Wallet, amount: f64) -> Result<(), ChargeError> {
    let remaining = campaign.daily_remaining();
    if remaining + EPSILON < amount {
        return Err(ChargeError::InsufficientDailyBudget { remaining, amount });
    }
    if wallet.balance_available + EPSILON < amount {
        return Err(ChargeError::InsufficientBalance {
            available: wallet.balance_available,
            amount,
        });
    }
    if campaign
        .total_budget
        .is_some_and(|total| campaign.total_spent + amount > total + EPSILON)
    {
        return Err(ChargeError::TotalBudgetExhausted);
    }
    Ok(())
}

fn positive(amount: f64) -> Result<(), LedgerError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use motorads_core::targeting::TargetingSpec;
    use motorads_core::types::{CampaignObjective, PricingModel};
    use motorads_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: WalletLedger,
        wallet_id: Uuid,
        campaign_id: Uuid,
    }

    fn fixture(balance: f64, daily_budget: f64, daily_spent: f64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = WalletLedger::new(store.clone(), "SAR");
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
        store.insert_wallet(wallet).unwrap();
        if balance > 0.0 {
            ledger.topup(wallet_id, balance, None).unwrap();
        }
        let campaign = Campaign {
            id: Uuid::new_v4(),
            account_id,
            name: "Test".to_string(),
            objective: CampaignObjective::Traffic,
            pricing_model: PricingModel::Cpc,
            status: CampaignStatus::Active,
            daily_budget,
            daily_spent,
            total_budget: None,
            total_spent: daily_spent,
            start_at: None,
            end_at: None,
            targeting: TargetingSpec::default().normalize(),
            created_at: now,
            updated_at: now,
        };
        let campaign_id = campaign.id;
        store.insert_campaign(campaign).unwrap();
        Fixture {
            store,
            ledger,
            wallet_id,
            campaign_id,
        }
    }

    fn click(campaign_id: Uuid, amount: f64, event_id: Option<Uuid>) -> ChargeRequest {
        ChargeRequest {
            campaign_id,
            amount,
            kind: EventKind::Click,
            creative_id: Uuid::new_v4(),
            event_id,
        }
    }

    #[test]
    fn test_charge_debits_wallet_and_campaign() {
        let f = fixture(100.0, 50.0, 0.0);
        let receipt = f.ledger.charge(&click(f.campaign_id, 1.5, None)).unwrap();
        assert!(!receipt.replayed);
        assert!((receipt.balance_after - 98.5).abs() < 1e-9);

        let wallet = f.ledger.wallet(f.wallet_id).unwrap();
        assert!((wallet.balance_available - 98.5).abs() < 1e-9);
        assert!((wallet.lifetime_spent - 1.5).abs() < 1e-9);

        let campaign = f.store.get_campaign(f.campaign_id).unwrap();
        assert!((campaign.daily_spent - 1.5).abs() < 1e-9);
        assert!((campaign.total_spent - 1.5).abs() < 1e-9);

        let tx = f.store.get_transaction(receipt.transaction_id).unwrap();
        assert_eq!(tx.kind, TransactionKind::Spend);
        assert_eq!(tx.related_campaign_id, Some(f.campaign_id));
        f.ledger.verify_wallet(f.wallet_id).unwrap();
    }

    #[test]
    fn test_daily_budget_failure_exhausts_campaign() {
        let f = fixture(100.0, 100.0, 99.0);
        let err = f.ledger.charge(&click(f.campaign_id, 1.5, None)).unwrap_err();
        assert!(matches!(err, ChargeError::InsufficientDailyBudget { .. }));

        let campaign = f.store.get_campaign(f.campaign_id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::BudgetExhausted);
        assert!((campaign.daily_spent - 99.0).abs() < 1e-9);
        let wallet = f.ledger.wallet(f.wallet_id).unwrap();
        assert!((wallet.balance_available - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_remaining_budget_is_chargeable() {
        let f = fixture(100.0, 100.0, 98.5);
        f.ledger.charge(&click(f.campaign_id, 1.5, None)).unwrap();
        let campaign = f.store.get_campaign(f.campaign_id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Active);
        assert!((campaign.daily_spent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_balance_exhausts_campaign() {
        let f = fixture(1.0, 100.0, 0.0);
        let err = f.ledger.charge(&click(f.campaign_id, 1.5, None)).unwrap_err();
        assert!(matches!(err, ChargeError::InsufficientBalance { .. }));
        assert_eq!(
            f.store.get_campaign(f.campaign_id).unwrap().status,
            CampaignStatus::BudgetExhausted
        );
    }

    #[test]
    fn test_total_budget_enforced() {
        let f = fixture(100.0, 100.0, 0.0);
        f.store
            .update_campaign(f.campaign_id, &mut |c| {
                c.total_budget = Some(2.0);
                Ok(())
            })
            .unwrap();
        f.ledger.charge(&click(f.campaign_id, 1.5, None)).unwrap();
        let err = f.ledger.charge(&click(f.campaign_id, 1.5, None)).unwrap_err();
        assert_eq!(err, ChargeError::TotalBudgetExhausted);
    }

    #[test]
    fn test_missing_wallet_does_not_touch_campaign() {
        let f = fixture(100.0, 100.0, 0.0);
        let orphan = Campaign {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            ..f.store.get_campaign(f.campaign_id).unwrap()
        };
        let orphan_id = orphan.id;
        f.store.insert_campaign(orphan).unwrap();
        let err = f.ledger.charge(&click(orphan_id, 1.0, None)).unwrap_err();
        assert_eq!(err, ChargeError::WalletNotFound);
        assert_eq!(
            f.store.get_campaign(orphan_id).unwrap().status,
            CampaignStatus::Active
        );
    }

    #[test]
    fn test_paused_campaign_stays_paused_on_failure() {
        let f = fixture(0.5, 100.0, 0.0);
        f.store
            .update_campaign(f.campaign_id, &mut |c| {
                c.status = CampaignStatus::Paused;
                Ok(())
            })
            .unwrap();
        assert!(f.ledger.charge(&click(f.campaign_id, 1.0, None)).is_err());
        assert_eq!(
            f.store.get_campaign(f.campaign_id).unwrap().status,
            CampaignStatus::Paused
        );
    }

    #[test]
    fn test_charge_is_idempotent_per_event() {
        let f = fixture(100.0, 100.0, 0.0);
        let event_id = Uuid::new_v4();
        let first = f.ledger.charge(&click(f.campaign_id, 2.0, Some(event_id))).unwrap();
        let second = f.ledger.charge(&click(f.campaign_id, 2.0, Some(event_id))).unwrap();
        assert!(second.replayed);
        assert_eq!(first.transaction_id, second.transaction_id);
        let wallet = f.ledger.wallet(f.wallet_id).unwrap();
        assert!((wallet.balance_available - 98.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_amount_rejected() {
        let f = fixture(100.0, 100.0, 0.0);
        assert_eq!(
            f.ledger.charge(&click(f.campaign_id, 0.0, None)).unwrap_err(),
            ChargeError::InvalidAmount(0.0)
        );
        assert!(f.ledger.charge(&click(f.campaign_id, f64::NAN, None)).is_err());
        assert_eq!(
            f.store.get_campaign(f.campaign_id).unwrap().status,
            CampaignStatus::Active
        );
    }

    #[test]
    fn test_concurrent_charges_only_one_passes() {
        let f = fixture(1.5, 100.0, 0.0);
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let ledger = &f.ledger;
                    let campaign_id = f.campaign_id;
                    s.spawn(move || ledger.charge(&click(campaign_id, 1.5, Some(Uuid::new_v4()))))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let wallet = f.ledger.wallet(f.wallet_id).unwrap();
        assert!(wallet.balance_available.abs() < 1e-9);
        f.ledger.verify_wallet(f.wallet_id).unwrap();
    }

    #[test]
    fn test_refund_restores_balance_and_spend() {
        let f = fixture(100.0, 100.0, 10.0);
        let receipt = f.ledger.charge(&click(f.campaign_id, 1.5, None)).unwrap();
        let refund = f.ledger.refund(receipt.transaction_id, "fraud").unwrap();

        assert_eq!(refund.kind, TransactionKind::Refund);
        assert_eq!(refund.original_transaction_id, Some(receipt.transaction_id));
        assert!((refund.amount - 1.5).abs() < 1e-9);
        assert_eq!(refund.meta["reason"], "fraud");

        let wallet = f.ledger.wallet(f.wallet_id).unwrap();
        assert!((wallet.balance_available - 100.0).abs() < 1e-9);
        assert!(wallet.lifetime_spent.abs() < 1e-9);
        let campaign = f.store.get_campaign(f.campaign_id).unwrap();
        assert!((campaign.daily_spent - 10.0).abs() < 1e-9);
        f.ledger.verify_wallet(f.wallet_id).unwrap();
    }

    #[test]
    fn test_refund_is_exactly_once() {
        let f = fixture(100.0, 100.0, 0.0);
        let receipt = f.ledger.charge(&click(f.campaign_id, 1.5, None)).unwrap();
        f.ledger.refund(receipt.transaction_id, "fraud").unwrap();
        assert_eq!(
            f.ledger.refund(receipt.transaction_id, "again").unwrap_err(),
            LedgerError::AlreadyRefunded(receipt.transaction_id)
        );
    }

    #[test]
    fn test_refund_of_topup_rejected() {
        let f = fixture(0.0, 100.0, 0.0);
        let topup = f.ledger.topup(f.wallet_id, 10.0, Some("pay-1".into())).unwrap();
        assert_eq!(
            f.ledger.refund(topup.id, "nope").unwrap_err(),
            LedgerError::NotASpend(topup.id)
        );
        assert!(matches!(
            f.ledger.refund(Uuid::new_v4(), "nope").unwrap_err(),
            LedgerError::NotFound { .. }
        ));
    }

    #[test]
    fn test_topup_does_not_touch_daily_spend() {
        let f = fixture(0.0, 100.0, 5.0);
        let tx = f.ledger.topup(f.wallet_id, 25.0, Some("pay-42".into())).unwrap();
        assert_eq!(tx.related_payment_ref.as_deref(), Some("pay-42"));
        let campaign = f.store.get_campaign(f.campaign_id).unwrap();
        assert!((campaign.daily_spent - 5.0).abs() < 1e-9);
        assert!((f.ledger.wallet(f.wallet_id).unwrap().balance_available - 25.0).abs() < 1e-9);
        assert!(f.ledger.topup(f.wallet_id, -1.0, None).is_err());
    }

    #[test]
    fn test_hold_release_adjust_keep_ledger_consistent() {
        let f = fixture(50.0, 100.0, 0.0);
        f.ledger.hold(f.wallet_id, 20.0, Some(f.campaign_id)).unwrap();
        let wallet = f.ledger.wallet(f.wallet_id).unwrap();
        assert!((wallet.balance_available - 30.0).abs() < 1e-9);
        assert!((wallet.balance_hold - 20.0).abs() < 1e-9);

        f.ledger.release(f.wallet_id, 5.0, Some(f.campaign_id)).unwrap();
        f.ledger.adjust(f.wallet_id, -3.0, "correction").unwrap();
        let wallet = f.ledger.wallet(f.wallet_id).unwrap();
        assert!((wallet.balance_available - 32.0).abs() < 1e-9);
        assert!((wallet.balance_hold - 15.0).abs() < 1e-9);

        // Cannot release more than is held or adjust below zero.
        assert!(matches!(
            f.ledger.release(f.wallet_id, 100.0, None).unwrap_err(),
            LedgerError::InsufficientFunds { .. }
        ));
        assert!(f.ledger.adjust(f.wallet_id, -1000.0, "too much").is_err());

        assert!((f.ledger.reconstruct_balance(f.wallet_id).unwrap() - 32.0).abs() < 1e-9);
        f.ledger.verify_wallet(f.wallet_id).unwrap();
    }

    #[test]
    fn test_transaction_listing_filters() {
        let f = fixture(100.0, 100.0, 0.0);
        f.ledger.charge(&click(f.campaign_id, 1.0, None)).unwrap();
        f.ledger.charge(&click(f.campaign_id, 2.0, None)).unwrap();

        let spends = f
            .ledger
            .transactions(
                f.wallet_id,
                &TransactionFilter {
                    kind: Some(TransactionKind::Spend),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(spends.len(), 2);
        let all = f
            .ledger
            .transactions(f.wallet_id, &TransactionFilter::default())
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(
            f.ledger
                .transactions_since(f.wallet_id, Utc::now() + chrono::Duration::hours(1))
                .unwrap()
                .len(),
            0
        );
    }
}
