//! Persistence interface for campaigns, creatives, wallets, the ledger,
//! events and daily rollups.
//!
//! Invariants (non-negative balances, one spend per event, one refund per
//! spend) are enforced here as well as in the ledger, so a write that would
//! break them fails as a whole instead of partially applying.

pub mod memory;

pub use memory::MemoryStore;

use chrono::NaiveDate;
use motorads_core::types::{
    AdEvent, Campaign, Creative, CtrHistory, DailyStat, DailyStatKey, Placement, StatDelta,
    TransactionKind, Viewer, Wallet, WalletTransaction,
};
use thiserror::Error;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("wallet {wallet_id} has {available:.4} available, {required:.4} required")]
    InsufficientBalance {
        wallet_id: Uuid,
        available: f64,
        required: f64,
    },

    #[error("campaign {campaign_id} budget exceeded")]
    BudgetExceeded { campaign_id: Uuid },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for motorads_core::AdsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => Self::not_found(entity, id),
            other => Self::Store(other.to_string()),
        }
    }
}

/// Spend counters moved together with a wallet mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CampaignSpendDelta {
    pub campaign_id: Uuid,
    pub daily: f64,
    pub total: f64,
}

/// One atomic ledger mutation: balance deltas, optional campaign spend
/// deltas and the transaction row that explains them.
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    pub available_delta: f64,
    pub hold_delta: f64,
    pub lifetime_spent_delta: f64,
    pub campaign: Option<CampaignSpendDelta>,
    pub transaction: WalletTransaction,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub campaign_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn accepts(&self, tx: &WalletTransaction) -> bool {
        self.kind.map_or(true, |k| tx.kind == k)
            && self
                .campaign_id
                .map_or(true, |c| tx.related_campaign_id == Some(c))
    }
}

/// Campaign mutation callback. Returning an error aborts the update.
pub type CampaignUpdate<'a> = &'a mut dyn FnMut(&mut Campaign) -> StoreResult<()>;

/// Transactional store used by every component.
pub trait AdStore: Send + Sync {
    // ─── Campaigns & creatives ──────────────────────────────────────────
    fn insert_campaign(&self, campaign: Campaign) -> StoreResult<()>;
    fn get_campaign(&self, id: Uuid) -> Option<Campaign>;
    fn list_campaigns(&self) -> Vec<Campaign>;
    /// Apply `update` under the row lock and return the new row.
    fn update_campaign(&self, id: Uuid, update: CampaignUpdate<'_>) -> StoreResult<Campaign>;
    /// Zero `daily_spent` on every campaign; returns how many changed.
    fn reset_daily_spend(&self) -> usize;

    fn insert_creative(&self, creative: Creative) -> StoreResult<()>;
    fn get_creative(&self, id: Uuid) -> Option<Creative>;
    fn creatives_for_campaign(&self, campaign_id: Uuid) -> Vec<Creative>;
    fn update_creative(
        &self,
        id: Uuid,
        update: &mut dyn FnMut(&mut Creative) -> StoreResult<()>,
    ) -> StoreResult<Creative>;

    /// Approved creatives of active campaigns, oldest creative first
    /// (ties broken by id) so callers get a deterministic order.
    fn servable_creatives(&self) -> Vec<(Creative, Campaign)>;

    // ─── Wallets & ledger ───────────────────────────────────────────────
    fn insert_wallet(&self, wallet: Wallet) -> StoreResult<()>;
    fn get_wallet(&self, id: Uuid) -> Option<Wallet>;
    fn wallet_for_account(&self, account_id: Uuid) -> Option<Wallet>;
    /// Apply a ledger write atomically; nothing changes on error.
    fn commit_ledger(&self, write: LedgerWrite) -> StoreResult<Wallet>;
    fn get_transaction(&self, id: Uuid) -> Option<WalletTransaction>;
    /// Newest first.
    fn transactions(&self, wallet_id: Uuid, filter: &TransactionFilter) -> Vec<WalletTransaction>;
    fn spend_for_event(&self, event_id: Uuid) -> Option<WalletTransaction>;
    fn refund_of(&self, spend_id: Uuid) -> Option<WalletTransaction>;

    // ─── Events & rollups ───────────────────────────────────────────────
    fn insert_event(&self, event: AdEvent) -> StoreResult<()>;
    fn get_event(&self, id: Uuid) -> Option<AdEvent>;
    fn update_event(
        &self,
        id: Uuid,
        update: &mut dyn FnMut(&mut AdEvent) -> StoreResult<()>,
    ) -> StoreResult<AdEvent>;
    /// Persisted impressions of `creative_id` shown to `viewer` on `date` (UTC).
    fn count_impressions(&self, viewer: &Viewer, creative_id: Uuid, date: NaiveDate) -> u64;

    fn upsert_daily_stat(&self, key: DailyStatKey, delta: StatDelta) -> DailyStat;
    fn daily_stat(&self, key: &DailyStatKey) -> Option<DailyStat>;
    /// Lifetime totals for one creative on one placement.
    fn ctr_history(&self, creative_id: Uuid, placement: Placement) -> CtrHistory;
}
