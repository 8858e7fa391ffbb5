//! Targeting documents: validation, normalization and matching.
//!
//! A campaign's targeting is a versioned document with optional sections.
//! A missing section never restricts serving; normalization fills the few
//! defaults (placements, audience, schedule/frequency cap) so matchers and
//! rankers always see a complete document. Validation accepts raw JSON so
//! that malformed input is reported per field instead of as one serde error.

use crate::types::{DeviceKind, Language, Placement, ServeContext, UserType};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TARGETING_VERSION: u32 = 1;
pub const DEFAULT_TIMEZONE: &str = "Asia/Riyadh";
pub const DEFAULT_IMPRESSIONS_PER_USER_PER_DAY: i32 = 5;
pub const DEFAULT_CLICKS_PER_USER_PER_DAY: i32 = 2;
const MIN_MODEL_YEAR: i32 = 1980;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Targeting document, schema version 1.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoTargeting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventoryFilters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_context: Option<AuctionContextFilters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<AudienceTargeting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placements: Option<PlacementTargeting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleTargeting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoTargeting {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_cities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_cities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_regions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    Sedan,
    #[serde(rename = "SUV")]
    Suv,
    Truck,
    Van,
    Coupe,
    Hatchback,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuelType {
    Gasoline,
    Diesel,
    Hybrid,
    Electric,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transmission {
    Auto,
    Manual,
    #[serde(rename = "CVT")]
    Cvt,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleCondition {
    New,
    Used,
    Salvage,
    TotalLoss,
    Repossession,
    Fleet,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InventoryFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub makes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_max: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mileage_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mileage_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_types: Vec<BodyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fuel_types: Vec<FuelType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transmission: Vec<Transmission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition: Vec<VehicleCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    Fixed,
    Auction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStage {
    Live,
    Instant,
    Late,
    Silent,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    Active,
    PendingInspection,
    ReadyToBid,
    InAuction,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuctionContextFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listing_type: Vec<ListingType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auction_stage: Vec<AuctionStage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub car_status: Vec<CarStatus>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudienceTargeting {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_types: Vec<UserType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_user_types: Vec<UserType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub language: Vec<Language>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device: Vec<DeviceKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_intent_score_min: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlacementTargeting {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<Placement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<Placement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    Smooth,
    Asap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyCap {
    #[serde(default = "default_impressions_cap")]
    pub impressions_per_user_per_day: i32,
    #[serde(default = "default_clicks_cap")]
    pub clicks_per_user_per_day: i32,
}

fn default_impressions_cap() -> i32 {
    DEFAULT_IMPRESSIONS_PER_USER_PER_DAY
}
fn default_clicks_cap() -> i32 {
    DEFAULT_CLICKS_PER_USER_PER_DAY
}

impl Default for FrequencyCap {
    fn default() -> Self {
        Self {
            impressions_per_user_per_day: default_impressions_cap(),
            clicks_per_user_per_day: default_clicks_cap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScheduleTargeting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    /// 0 = Sunday .. 6 = Saturday.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<HourWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing: Option<Pacing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_cap: Option<FrequencyCap>,
}

impl ScheduleTargeting {
    /// Schedule timezone, falling back to the marketplace default when unset
    /// or unparseable (validation reports the latter).
    pub fn tz(&self) -> Tz {
        self.timezone
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(chrono_tz::Asia::Riyadh)
    }

    /// Whether the schedule allows serving at `now`.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        if self.start_at.is_some_and(|start| now < start) {
            return false;
        }
        if self.end_at.is_some_and(|end| now > end) {
            return false;
        }

        let local = now.with_timezone(&self.tz());

        if !self.days_of_week.is_empty() {
            let day = local.weekday().num_days_from_sunday() as i32;
            if !self.days_of_week.contains(&day) {
                return false;
            }
        }

        if let Some(hours) = self.hours {
            let hour = local.hour() as i32;
            let from = hours.from.unwrap_or(0);
            let to = hours.to.unwrap_or(23);
            if hour < from || hour > to {
                return false;
            }
        }

        true
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Field path -> messages, e.g. `"inventory.price_min"`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Outcome of validating a targeting document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetingReport {
    pub valid: bool,
    pub errors: FieldErrors,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<TargetingSpec>,
}

impl TargetingReport {
    fn invalid(errors: FieldErrors) -> Self {
        Self {
            valid: false,
            errors,
            normalized: None,
        }
    }
}

fn push(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.into());
}

fn check_range<T: PartialOrd + Copy + std::fmt::Display>(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<T>,
    min: T,
    max: Option<T>,
) {
    let Some(v) = value else { return };
    if v < min {
        push(errors, field, format!("{field} must be at least {min}"));
    }
    if let Some(max) = max {
        if v > max {
            push(errors, field, format!("{field} may not be greater than {max}"));
        }
    }
}

fn check_order<T: PartialOrd>(
    errors: &mut FieldErrors,
    field: &str,
    min: Option<T>,
    max: Option<T>,
    message: &str,
) {
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            push(errors, field, message);
        }
    }
}

/// Validate a raw targeting document and return its normalized form when valid.
pub fn validate(raw: &serde_json::Value) -> TargetingReport {
    let mut errors = FieldErrors::new();

    let Some(object) = raw.as_object() else {
        push(&mut errors, "targeting", "targeting must be an object");
        return TargetingReport::invalid(errors);
    };

    match object.get("version") {
        None | Some(serde_json::Value::Null) => push(&mut errors, "version", "version is required"),
        Some(v) if v.as_u64() != Some(u64::from(TARGETING_VERSION)) => {
            push(&mut errors, "version", "version must be 1");
        }
        Some(_) => {}
    }
    if !errors.is_empty() {
        return TargetingReport::invalid(errors);
    }

    let spec: TargetingSpec = match serde_json::from_value(raw.clone()) {
        Ok(spec) => spec,
        Err(e) => {
            push(&mut errors, "targeting", e.to_string());
            return TargetingReport::invalid(errors);
        }
    };

    spec.validate()
}

impl TargetingSpec {
    /// Structural checks on an already-typed document.
    pub fn validate(&self) -> TargetingReport {
        let errors = self.field_errors(Utc::now().year());
        if errors.is_empty() {
            TargetingReport {
                valid: true,
                errors,
                normalized: Some(self.clone().normalize()),
            }
        } else {
            TargetingReport::invalid(errors)
        }
    }

    fn field_errors(&self, current_year: i32) -> FieldErrors {
        let mut errors = FieldErrors::new();

        if self.version.is_some_and(|v| v != TARGETING_VERSION) {
            push(&mut errors, "version", "version must be 1");
        }

        if let Some(geo) = &self.geo {
            check_range(&mut errors, "geo.radius_km", geo.radius_km, 1, Some(300));
            if let Some(center) = geo.center {
                check_range(&mut errors, "geo.center.lat", Some(center.lat), -90.0, Some(90.0));
                check_range(&mut errors, "geo.center.lng", Some(center.lng), -180.0, Some(180.0));
            }
        }

        if let Some(inv) = &self.inventory {
            let max_year = Some(current_year + 1);
            check_range(&mut errors, "inventory.year_min", inv.year_min, MIN_MODEL_YEAR, max_year);
            check_range(&mut errors, "inventory.year_max", inv.year_max, MIN_MODEL_YEAR, max_year);
            check_range(&mut errors, "inventory.price_min", inv.price_min, 0.0, None);
            check_range(&mut errors, "inventory.price_max", inv.price_max, 0.0, None);
            check_range(&mut errors, "inventory.mileage_min", inv.mileage_min, 0.0, None);
            check_range(&mut errors, "inventory.mileage_max", inv.mileage_max, 0.0, None);
            check_order(
                &mut errors,
                "inventory.price_min",
                inv.price_min,
                inv.price_max,
                "price_min must be less than or equal to price_max",
            );
            check_order(
                &mut errors,
                "inventory.year_min",
                inv.year_min,
                inv.year_max,
                "year_min must be less than or equal to year_max",
            );
            check_order(
                &mut errors,
                "inventory.mileage_min",
                inv.mileage_min,
                inv.mileage_max,
                "mileage_min must be less than or equal to mileage_max",
            );
        }

        if let Some(audience) = &self.audience {
            check_range(
                &mut errors,
                "audience.buyer_intent_score_min",
                audience.buyer_intent_score_min,
                0,
                Some(100),
            );
        }

        if let Some(schedule) = &self.schedule {
            if let Some(tz) = &schedule.timezone {
                if tz.parse::<Tz>().is_err() {
                    push(&mut errors, "schedule.timezone", format!("unknown timezone {tz}"));
                }
            }
            check_order(
                &mut errors,
                "schedule.end_at",
                schedule.start_at,
                schedule.end_at,
                "end_at must be after or equal to start_at",
            );
            for day in &schedule.days_of_week {
                check_range(&mut errors, "schedule.days_of_week", Some(*day), 0, Some(6));
            }
            if let Some(hours) = schedule.hours {
                check_range(&mut errors, "schedule.hours.from", hours.from, 0, Some(23));
                check_range(&mut errors, "schedule.hours.to", hours.to, 0, Some(23));
                check_order(
                    &mut errors,
                    "schedule.hours.from",
                    hours.from,
                    hours.to,
                    "hours.from must be less than or equal to hours.to",
                );
            }
            if let Some(cap) = schedule.frequency_cap {
                check_range(
                    &mut errors,
                    "schedule.frequency_cap.impressions_per_user_per_day",
                    Some(cap.impressions_per_user_per_day),
                    0,
                    Some(50),
                );
                check_range(
                    &mut errors,
                    "schedule.frequency_cap.clicks_per_user_per_day",
                    Some(cap.clicks_per_user_per_day),
                    0,
                    Some(20),
                );
            }
        }

        errors
    }

    // -----------------------------------------------------------------------
    // Normalization
    // -----------------------------------------------------------------------

    /// Fill defaults. Never fails and is idempotent.
    pub fn normalize(mut self) -> Self {
        self.version.get_or_insert(TARGETING_VERSION);

        let placements = self.placements.get_or_insert_with(PlacementTargeting::default);
        if placements.include.is_empty() {
            placements.include = vec![Placement::SearchListings, Placement::CarDetails];
        }

        let audience = self.audience.get_or_insert_with(AudienceTargeting::default);
        if audience.user_types.is_empty() {
            audience.user_types = vec![UserType::Registered, UserType::VerifiedBuyer];
        }

        let schedule = self.schedule.get_or_insert_with(ScheduleTargeting::default);
        schedule.pacing.get_or_insert(Pacing::Smooth);
        schedule.frequency_cap.get_or_insert_with(FrequencyCap::default);
        schedule
            .timezone
            .get_or_insert_with(|| DEFAULT_TIMEZONE.to_string());

        self
    }

    /// Per-viewer daily impression cap configured for this campaign.
    pub fn impression_cap(&self) -> u32 {
        let cap = self
            .schedule
            .as_ref()
            .and_then(|s| s.frequency_cap)
            .map_or(DEFAULT_IMPRESSIONS_PER_USER_PER_DAY, |c| {
                c.impressions_per_user_per_day
            });
        u32::try_from(cap).unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    /// Whether a serve request satisfies this targeting at `now`.
    ///
    /// Checks run in a fixed order: placement exclude, placement include,
    /// geo exclude, geo include, audience exclude, audience include, schedule.
    pub fn matches(&self, ctx: &ServeContext, now: DateTime<Utc>) -> bool {
        let spec = self.clone().normalize();

        if let Some(placements) = &spec.placements {
            if placements.exclude.contains(&ctx.placement) {
                return false;
            }
            if !placements.include.is_empty() && !placements.include.contains(&ctx.placement) {
                return false;
            }
        }

        if let (Some(geo), Some(city)) = (&spec.geo, ctx.city.as_deref()) {
            if contains_name(&geo.exclude_cities, city) {
                return false;
            }
            if !geo.include_cities.is_empty() && !contains_name(&geo.include_cities, city) {
                let region_ok = ctx
                    .region
                    .as_deref()
                    .is_some_and(|region| contains_name(&geo.include_regions, region));
                if !region_ok {
                    return false;
                }
            }
        }

        if let Some(audience) = &spec.audience {
            if let Some(user_type) = ctx.user_type {
                if audience.exclude_user_types.contains(&user_type) {
                    return false;
                }
                if !audience.user_types.is_empty() && !audience.user_types.contains(&user_type) {
                    return false;
                }
            }
            if let Some(language) = ctx.language {
                if !audience.language.is_empty() && !audience.language.contains(&language) {
                    return false;
                }
            }
            if let Some(device) = ctx.device {
                if !audience.device.is_empty() && !audience.device.contains(&device) {
                    return false;
                }
            }
        }

        spec.schedule_allows(now)
    }

    /// Schedule-only check; an absent schedule always allows serving.
    pub fn schedule_allows(&self, now: DateTime<Utc>) -> bool {
        self.schedule.as_ref().map_or(true, |s| s.allows(now))
    }

    // -----------------------------------------------------------------------
    // Graded affinities used by ranking
    // -----------------------------------------------------------------------

    /// 1.0 for an explicit or implicit city match, 0.5 for a region or
    /// radius match, 0.0 when excluded or outside every include list.
    pub fn geo_affinity(&self, ctx: &ServeContext) -> f64 {
        let (Some(geo), Some(city)) = (&self.geo, ctx.city.as_deref()) else {
            return 1.0;
        };

        if contains_name(&geo.exclude_cities, city) {
            return 0.0;
        }
        if contains_name(&geo.include_cities, city) {
            return 1.0;
        }
        if ctx
            .region
            .as_deref()
            .is_some_and(|region| contains_name(&geo.include_regions, region))
        {
            return 0.5;
        }
        // TODO: replace with a haversine distance check once listings carry coordinates.
        if geo.radius_km.is_some() && geo.center.is_some() {
            return 0.5;
        }

        if geo.include_cities.is_empty() && geo.include_regions.is_empty() {
            1.0
        } else {
            0.0
        }
    }

    pub fn placement_affinity(&self, placement: Placement) -> f64 {
        let spec = self.clone().normalize();
        let Some(placements) = spec.placements else {
            return 1.0;
        };
        if placements.exclude.contains(&placement) {
            return 0.0;
        }
        if placements.include.is_empty() || placements.include.contains(&placement) {
            1.0
        } else {
            0.0
        }
    }

    /// Anonymous requests are scored as guests.
    pub fn audience_affinity(&self, user_type: Option<UserType>) -> f64 {
        let user_type = user_type.unwrap_or(UserType::Guest);
        let spec = self.clone().normalize();
        let Some(audience) = spec.audience else {
            return 1.0;
        };
        if audience.exclude_user_types.contains(&user_type) {
            return 0.0;
        }
        if audience.user_types.is_empty() || audience.user_types.contains(&user_type) {
            1.0
        } else {
            0.0
        }
    }
}

fn contains_name(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx(placement: Placement) -> ServeContext {
        let mut ctx = ServeContext::new(placement, "sess-1");
        ctx.user_type = Some(UserType::Registered);
        ctx
    }

    fn noon_riyadh_wednesday() -> DateTime<Utc> {
        // 2024-01-17 is a Wednesday; 09:00 UTC is 12:00 in Riyadh.
        Utc.with_ymd_and_hms(2024, 1, 17, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_validate_requires_version() {
        let report = validate(&json!({ "geo": { "include_cities": ["Riyadh"] } }));
        assert!(!report.valid);
        assert!(report.errors.contains_key("version"));

        let report = validate(&json!({ "version": 2 }));
        assert!(!report.valid);
    }

    #[test]
    fn test_validate_rejects_unknown_enum_values() {
        let report = validate(&json!({
            "version": 1,
            "placements": { "include": ["sidebar"] }
        }));
        assert!(!report.valid);
        assert!(report.errors.contains_key("targeting"));
    }

    #[test]
    fn test_validate_min_max_pairs() {
        let report = validate(&json!({
            "version": 1,
            "inventory": { "price_min": 90000, "price_max": 50000, "year_min": 2020, "year_max": 2015 },
            "schedule": { "hours": { "from": 20, "to": 8 } }
        }));
        assert!(!report.valid);
        assert!(report.errors.contains_key("inventory.price_min"));
        assert!(report.errors.contains_key("inventory.year_min"));
        assert!(report.errors.contains_key("schedule.hours.from"));
    }

    #[test]
    fn test_validate_numeric_ranges() {
        let report = validate(&json!({
            "version": 1,
            "geo": { "radius_km": 500 },
            "schedule": {
                "days_of_week": [7],
                "frequency_cap": { "impressions_per_user_per_day": 51 },
                "timezone": "Mars/Olympus"
            }
        }));
        assert!(!report.valid);
        assert!(report.errors.contains_key("geo.radius_km"));
        assert!(report.errors.contains_key("schedule.days_of_week"));
        assert!(report
            .errors
            .contains_key("schedule.frequency_cap.impressions_per_user_per_day"));
        assert!(report.errors.contains_key("schedule.timezone"));
    }

    #[test]
    fn test_valid_document_is_normalized() {
        let report = validate(&json!({ "version": 1, "geo": { "include_cities": ["Riyadh"] } }));
        assert!(report.valid, "{:?}", report.errors);
        let spec = report.normalized.unwrap();
        let placements = spec.placements.as_ref().unwrap();
        assert_eq!(
            placements.include,
            vec![Placement::SearchListings, Placement::CarDetails]
        );
        let schedule = spec.schedule.as_ref().unwrap();
        assert_eq!(schedule.pacing, Some(Pacing::Smooth));
        assert_eq!(schedule.timezone.as_deref(), Some(DEFAULT_TIMEZONE));
        assert_eq!(spec.impression_cap(), 5);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let report = validate(&json!({
            "version": 1,
            "audience": { "exclude_user_types": ["dealer"] },
            "schedule": { "days_of_week": [0, 1, 2] }
        }));
        let once = report.normalized.unwrap();
        let twice = once.clone().normalize();
        assert_eq!(once, twice);
        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    #[test]
    fn test_exclude_city_wins_over_include() {
        let spec = TargetingSpec {
            geo: Some(GeoTargeting {
                include_cities: vec!["Jeddah".into()],
                exclude_cities: vec!["Jeddah".into()],
                include_regions: vec!["Makkah".into()],
                ..GeoTargeting::default()
            }),
            ..TargetingSpec::default()
        };
        let mut c = ctx(Placement::SearchListings);
        c.city = Some("Jeddah".into());
        c.region = Some("Makkah".into());
        assert!(!spec.matches(&c, noon_riyadh_wednesday()));
    }

    #[test]
    fn test_include_region_rescues_city_miss() {
        let spec = TargetingSpec {
            geo: Some(GeoTargeting {
                include_cities: vec!["Riyadh".into()],
                include_regions: vec!["Makkah".into()],
                ..GeoTargeting::default()
            }),
            ..TargetingSpec::default()
        };
        let now = noon_riyadh_wednesday();
        let mut c = ctx(Placement::SearchListings);
        c.city = Some("Taif".into());
        c.region = Some("Makkah".into());
        assert!(spec.matches(&c, now));

        c.region = Some("Eastern".into());
        assert!(!spec.matches(&c, now));

        c.region = None;
        assert!(!spec.matches(&c, now));
    }

    #[test]
    fn test_placement_defaults_and_excludes() {
        let spec = TargetingSpec::default();
        let now = noon_riyadh_wednesday();
        assert!(spec.matches(&ctx(Placement::SearchListings), now));
        assert!(!spec.matches(&ctx(Placement::Home), now));

        let spec = TargetingSpec {
            placements: Some(PlacementTargeting {
                include: vec![Placement::Home, Placement::CarDetails],
                exclude: vec![Placement::CarDetails],
                positions: vec![],
            }),
            ..TargetingSpec::default()
        };
        assert!(spec.matches(&ctx(Placement::Home), now));
        assert!(!spec.matches(&ctx(Placement::CarDetails), now));
    }

    #[test]
    fn test_audience_include_exclude() {
        let now = noon_riyadh_wednesday();
        let spec = TargetingSpec {
            audience: Some(AudienceTargeting {
                exclude_user_types: vec![UserType::Dealer],
                ..AudienceTargeting::default()
            }),
            ..TargetingSpec::default()
        };
        let mut c = ctx(Placement::SearchListings);
        c.user_type = Some(UserType::Dealer);
        assert!(!spec.matches(&c, now));

        // Default include list is registered + verified buyers.
        c.user_type = Some(UserType::Guest);
        assert!(!spec.matches(&c, now));

        c.user_type = Some(UserType::VerifiedBuyer);
        assert!(spec.matches(&c, now));

        // Unknown user type is not filtered on.
        c.user_type = None;
        assert!(spec.matches(&c, now));
    }

    #[test]
    fn test_absent_sections_are_permissive() {
        let spec = TargetingSpec {
            placements: Some(PlacementTargeting {
                include: Placement::ALL.to_vec(),
                ..PlacementTargeting::default()
            }),
            ..TargetingSpec::default()
        };
        let mut c = ctx(Placement::LiveStreamOverlay);
        c.city = Some("Dammam".into());
        assert!(spec.matches(&c, Utc::now()));
    }

    #[test]
    fn test_schedule_days_and_hours_in_timezone() {
        let now = noon_riyadh_wednesday();
        let mut schedule = ScheduleTargeting {
            days_of_week: vec![3],
            hours: Some(HourWindow {
                from: Some(12),
                to: Some(12),
            }),
            ..ScheduleTargeting::default()
        };
        assert!(schedule.allows(now));

        schedule.days_of_week = vec![5, 6];
        assert!(!schedule.allows(now));

        schedule.days_of_week.clear();
        schedule.hours = Some(HourWindow {
            from: Some(13),
            to: None,
        });
        assert!(!schedule.allows(now));

        schedule.timezone = Some("UTC".into());
        schedule.hours = Some(HourWindow {
            from: Some(9),
            to: Some(9),
        });
        assert!(schedule.allows(now));
    }

    #[test]
    fn test_schedule_window() {
        let now = noon_riyadh_wednesday();
        let schedule = ScheduleTargeting {
            start_at: Some(now + chrono::Duration::days(1)),
            ..ScheduleTargeting::default()
        };
        assert!(!schedule.allows(now));
        let schedule = ScheduleTargeting {
            end_at: Some(now - chrono::Duration::seconds(1)),
            ..ScheduleTargeting::default()
        };
        assert!(!schedule.allows(now));
    }

    #[test]
    fn test_geo_affinity_grades() {
        let spec = TargetingSpec {
            geo: Some(GeoTargeting {
                include_cities: vec!["Riyadh".into()],
                include_regions: vec!["Makkah".into()],
                exclude_cities: vec!["Abha".into()],
                ..GeoTargeting::default()
            }),
            ..TargetingSpec::default()
        };
        let mut c = ctx(Placement::SearchListings);
        assert_eq!(spec.geo_affinity(&c), 1.0);

        c.city = Some("riyadh".into());
        assert_eq!(spec.geo_affinity(&c), 1.0);

        c.city = Some("Taif".into());
        c.region = Some("Makkah".into());
        assert_eq!(spec.geo_affinity(&c), 0.5);

        c.region = None;
        assert_eq!(spec.geo_affinity(&c), 0.0);

        c.city = Some("Abha".into());
        assert_eq!(spec.geo_affinity(&c), 0.0);
    }

    #[test]
    fn test_placement_and_audience_affinity() {
        let spec = TargetingSpec::default();
        assert_eq!(spec.placement_affinity(Placement::SearchListings), 1.0);
        assert_eq!(spec.placement_affinity(Placement::AuctionRoom), 0.0);
        assert_eq!(spec.audience_affinity(None), 0.0);
        assert_eq!(spec.audience_affinity(Some(UserType::Registered)), 1.0);
    }
}
