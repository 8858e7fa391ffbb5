use crate::targeting::TargetingSpec;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a listing in the external marketplace.
pub type ListingId = u64;

/// Identifier of a listing owner (seller entity) in the external marketplace.
pub type OwnerId = u64;

// ─── Enumerations ───────────────────────────────────────────────────────

/// Surface on which sponsored listings can be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Home,
    SearchListings,
    CarDetails,
    AuctionRoom,
    LiveStreamOverlay,
}

impl Placement {
    pub const ALL: &'static [Placement] = &[
        Self::Home,
        Self::SearchListings,
        Self::CarDetails,
        Self::AuctionRoom,
        Self::LiveStreamOverlay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::SearchListings => "search_listings",
            Self::CarDetails => "car_details",
            Self::AuctionRoom => "auction_room",
            Self::LiveStreamOverlay => "live_stream_overlay",
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PricingModel {
    Cpc,
    Cpm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignObjective {
    Views,
    Traffic,
    Leads,
}

/// Campaign lifecycle state. Transition rules live in [`crate::lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Pending,
    Active,
    Paused,
    BudgetExhausted,
    Rejected,
    Ended,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Rejected => "rejected",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreativeStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Guest,
    Registered,
    VerifiedBuyer,
    Dealer,
    CompanyUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ar,
    En,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Web,
    Mobile,
}

// ─── Campaigns & creatives ──────────────────────────────────────────────

/// A funded advertising campaign owned by an ad account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub objective: CampaignObjective,
    pub pricing_model: PricingModel,
    pub status: CampaignStatus,
    pub daily_budget: f64,
    #[serde(default)]
    pub daily_spent: f64,
    #[serde(default)]
    pub total_budget: Option<f64>,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    pub targeting: TargetingSpec,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Whether `now` falls inside the optional `[start_at, end_at]` window.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        if self.start_at.is_some_and(|start| now < start) {
            return false;
        }
        if self.end_at.is_some_and(|end| now > end) {
            return false;
        }
        true
    }

    pub fn daily_remaining(&self) -> f64 {
        self.daily_budget - self.daily_spent
    }

    pub fn has_remaining_daily_budget(&self) -> bool {
        self.daily_remaining() > 0.0
    }

    /// Remaining lifetime budget, `None` when the campaign is uncapped.
    pub fn total_remaining(&self) -> Option<f64> {
        self.total_budget.map(|total| total - self.total_spent)
    }
}

/// The servable unit: one external listing promoted inside one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creative {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub listing_id: ListingId,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub cta: Option<String>,
    pub status: CreativeStatus,
    #[serde(default)]
    pub rejected_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Wallets & ledger ───────────────────────────────────────────────────

/// Funding account of an ad account. `balance_available` is never negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub account_id: Uuid,
    pub balance_available: f64,
    pub balance_hold: f64,
    pub lifetime_spent: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Topup,
    Spend,
    Refund,
    Adjustment,
    Hold,
    Release,
}

/// Append-only ledger entry. `amount` is signed by its effect on
/// `balance_available`, so the wallet balance is the sum of its entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: TransactionKind,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub related_campaign_id: Option<Uuid>,
    #[serde(default)]
    pub related_event_id: Option<Uuid>,
    #[serde(default)]
    pub related_payment_ref: Option<String>,
    #[serde(default)]
    pub original_transaction_id: Option<Uuid>,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ─── Events ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Impression,
    Click,
    Lead,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Impression => "impression",
            Self::Click => "click",
            Self::Lead => "lead",
        }
    }

    /// Whether an accepted event of this kind is charged under `pricing`.
    pub fn is_billable_under(self, pricing: PricingModel) -> bool {
        matches!(
            (self, pricing),
            (Self::Click, PricingModel::Cpc) | (Self::Impression, PricingModel::Cpm)
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-reported viewability of an impression.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportMetrics {
    #[serde(default)]
    pub viewport_seconds: f64,
    #[serde(default)]
    pub visible_ratio: f64,
}

/// A tracked engagement signal, carrying only what its kind needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventSignal {
    Impression(ViewportMetrics),
    Click,
    Lead,
}

impl EventSignal {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Impression(_) => EventKind::Impression,
            Self::Click => EventKind::Click,
            Self::Lead => EventKind::Lead,
        }
    }

    pub fn viewport(&self) -> Option<ViewportMetrics> {
        match self {
            Self::Impression(metrics) => Some(*metrics),
            Self::Click | Self::Lead => None,
        }
    }
}

/// Immutable record of an impression, click or lead. Only fraud
/// reclassification flips `is_valid` after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdEvent {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub creative_id: Uuid,
    pub placement: Placement,
    #[serde(default)]
    pub position: Option<String>,
    pub kind: EventKind,
    pub cost_charged: f64,
    pub currency: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub session_hash: String,
    #[serde(default)]
    pub ip_hash: Option<String>,
    #[serde(default)]
    pub user_agent_hash: Option<String>,
    #[serde(default)]
    pub viewport: Option<ViewportMetrics>,
    #[serde(default)]
    pub transaction_id: Option<Uuid>,
    pub served_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
}

/// Who an impression was shown to, for frequency capping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Viewer {
    User(String),
    Session(String),
}

impl Viewer {
    /// Authenticated users are capped by id, everyone else by hashed session.
    pub fn of(user_id: Option<&str>, session_hash: &str) -> Self {
        match user_id {
            Some(user) => Self::User(user.to_string()),
            None => Self::Session(session_hash.to_string()),
        }
    }

    pub fn matches(&self, event: &AdEvent) -> bool {
        match self {
            Self::User(user) => event.user_id.as_deref() == Some(user.as_str()),
            Self::Session(hash) => event.session_hash == *hash,
        }
    }
}

// ─── Daily rollups ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DailyStatKey {
    pub date: NaiveDate,
    pub campaign_id: Uuid,
    pub creative_id: Uuid,
    pub placement: Placement,
}

/// Signed increment applied to a daily rollup row.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatDelta {
    pub impressions: i64,
    pub clicks: i64,
    pub leads: i64,
    pub spend: f64,
}

impl StatDelta {
    pub fn for_event(kind: EventKind, spend: f64) -> Self {
        let mut delta = Self {
            spend,
            ..Self::default()
        };
        match kind {
            EventKind::Impression => delta.impressions = 1,
            EventKind::Click => delta.clicks = 1,
            EventKind::Lead => delta.leads = 1,
        }
        delta
    }

    pub fn negated(self) -> Self {
        Self {
            impressions: -self.impressions,
            clicks: -self.clicks,
            leads: -self.leads,
            spend: -self.spend,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStat {
    pub key: DailyStatKey,
    pub impressions: u64,
    pub clicks: u64,
    pub leads: u64,
    pub spend: f64,
    pub updated_at: DateTime<Utc>,
}

impl DailyStat {
    /// Click-through rate in percent.
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            return 0.0;
        }
        self.clicks as f64 / self.impressions as f64 * 100.0
    }
}

/// Lifetime impression/click totals of a creative on one placement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CtrHistory {
    pub impressions: u64,
    pub clicks: u64,
}

impl CtrHistory {
    /// Click-through rate in percent.
    pub fn ctr_percent(&self) -> f64 {
        if self.impressions == 0 {
            return 0.0;
        }
        self.clicks as f64 / self.impressions as f64 * 100.0
    }
}

// ─── External listings ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingImage {
    pub url: String,
}

/// Read-only listing attributes from the marketplace provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub images: Vec<ListingImage>,
    #[serde(default)]
    pub inspection_report: bool,
    #[serde(default, alias = "owner_entity_id")]
    pub owner_id: Option<OwnerId>,
}

// ─── Request contexts ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }
}

/// Everything known about a serve request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeContext {
    pub placement: Placement,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub device: Option<DeviceKind>,
    #[serde(default)]
    pub search_make: Option<String>,
    #[serde(default)]
    pub search_model: Option<String>,
    #[serde(default)]
    pub price_range: Option<PriceRange>,
    #[serde(default)]
    pub current_listing_id: Option<ListingId>,
}

impl ServeContext {
    pub fn new(placement: Placement, session_id: impl Into<String>) -> Self {
        Self {
            placement,
            session_id: session_id.into(),
            user_id: None,
            position: None,
            city: None,
            region: None,
            user_type: None,
            language: None,
            device: None,
            search_make: None,
            search_model: None,
            price_range: None,
            current_listing_id: None,
        }
    }
}

/// Request-side facts attached to a tracked event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackContext {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
}
