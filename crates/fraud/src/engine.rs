use chrono::{DateTime, Duration as ChronoDuration, Utc};
use motorads_cache::RateCounter;
use motorads_core::config::AntiFraudConfig;
use motorads_core::fingerprint::click_fingerprint;
use motorads_core::types::{EventSignal, ViewportMetrics};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const DAY: Duration = Duration::from_secs(86_400);

/// Why an event was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudReason {
    InsufficientViewport,
    InsufficientVisibleRatio,
    ClickCooldown,
    SessionClickCap,
    WindowClickCap,
    SuspiciousUserAgent,
    DuplicateClick,
    LeadWithoutUser,
}

impl FraudReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientViewport => "insufficient_viewport",
            Self::InsufficientVisibleRatio => "insufficient_visible_ratio",
            Self::ClickCooldown => "click_cooldown",
            Self::SessionClickCap => "session_click_cap",
            Self::WindowClickCap => "window_click_cap",
            Self::SuspiciousUserAgent => "suspicious_user_agent",
            Self::DuplicateClick => "duplicate_click",
            Self::LeadWithoutUser => "lead_without_user",
        }
    }
}

impl fmt::Display for FraudReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::InsufficientViewport => "Insufficient viewport time",
            Self::InsufficientVisibleRatio => "Insufficient visible ratio",
            Self::ClickCooldown => "Click cooldown not expired",
            Self::SessionClickCap => "Max clicks per session exceeded",
            Self::WindowClickCap => "Max clicks per time window exceeded",
            Self::SuspiciousUserAgent => "Suspicious user agent",
            Self::DuplicateClick => "Duplicate click pattern",
            Self::LeadWithoutUser => "User ID required for lead",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(FraudReason),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Accept)
    }

    pub fn reason(&self) -> Option<FraudReason> {
        match self {
            Self::Accept => None,
            Self::Reject(reason) => Some(*reason),
        }
    }
}

/// Request facts the heuristics look at. `session_hash` is already hashed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FraudContext<'a> {
    pub session_hash: &'a str,
    pub user_id: Option<&'a str>,
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// Counter failures are logged and the affected check is skipped: a
/// flaky cache must not block tracking.
fn soft<T: Default>(result: anyhow::Result<T>, op: &'static str) -> T {
    result.unwrap_or_else(|e| {
        warn!(op = op, error = %e, "Rate counter unavailable, skipping check");
        T::default()
    })
}

pub struct FraudEngine {
    config: AntiFraudConfig,
    counter: Arc<dyn RateCounter>,
}

impl FraudEngine {
    pub fn new(config: AntiFraudConfig, counter: Arc<dyn RateCounter>) -> Self {
        Self { config, counter }
    }

    /// Accept or reject one tracked signal for `creative_id`.
    pub async fn validate_event(
        &self,
        signal: &EventSignal,
        ctx: &FraudContext<'_>,
        creative_id: Uuid,
        now: DateTime<Utc>,
    ) -> Verdict {
        let verdict = match signal {
            EventSignal::Impression(viewport) => self.check_impression(viewport),
            EventSignal::Click => self.check_click(ctx, creative_id, now).await,
            EventSignal::Lead => Self::check_lead(ctx),
        };

        if let Verdict::Reject(reason) = verdict {
            metrics::counter!("fraud.rejections", "reason" => reason.as_str()).increment(1);
            debug!(
                creative_id = %creative_id,
                event = signal.kind().as_str(),
                reason = reason.as_str(),
                "Event rejected by anti-fraud"
            );
        }
        verdict
    }

    fn check_impression(&self, metrics: &ViewportMetrics) -> Verdict {
        if metrics.viewport_seconds < self.config.min_viewport_seconds {
            return Verdict::Reject(FraudReason::InsufficientViewport);
        }
        if metrics.visible_ratio < self.config.min_visible_ratio {
            return Verdict::Reject(FraudReason::InsufficientVisibleRatio);
        }
        Verdict::Accept
    }

    fn check_lead(ctx: &FraudContext<'_>) -> Verdict {
        match ctx.user_id {
            Some(user) if !user.is_empty() => Verdict::Accept,
            _ => Verdict::Reject(FraudReason::LeadWithoutUser),
        }
    }

    pub fn is_suspicious_user_agent(&self, user_agent: &str) -> bool {
        let ua = user_agent.to_lowercase();
        self.config
            .bot_patterns
            .iter()
            .any(|pattern| ua.contains(&pattern.to_lowercase()))
    }

    async fn check_click(
        &self,
        ctx: &FraudContext<'_>,
        creative_id: Uuid,
        now: DateTime<Utc>,
    ) -> Verdict {
        let session = ctx.session_hash;
        let counter = &self.counter;

        // Cooldown per session + creative.
        let cooldown = Duration::from_secs(self.config.click_cooldown_secs);
        let cooldown_key = format!("click_cooldown:{session}:{creative_id}");
        if let Some(last) = soft(counter.last_seen(&cooldown_key).await, "cooldown.get") {
            if last + chrono_span(cooldown) > now {
                return Verdict::Reject(FraudReason::ClickCooldown);
            }
        }
        soft(
            counter.mark_seen(&cooldown_key, now, cooldown).await,
            "cooldown.set",
        );

        // Daily cap per session + creative.
        let daily_key = format!(
            "clicks_session:{session}:{creative_id}:{}",
            now.format("%Y%m%d")
        );
        let clicks_today = soft(counter.count(&daily_key).await, "session.count");
        if clicks_today >= self.config.max_clicks_per_session_creative {
            return Verdict::Reject(FraudReason::SessionClickCap);
        }
        soft(counter.increment(&daily_key, DAY).await, "session.incr");

        // Sliding window per session, across creatives.
        let window = Duration::from_secs(self.config.click_window_secs);
        let window_key = format!("clicks_window:{session}");
        let recent = soft(counter.window_count(&window_key, now, window).await, "window.count");
        if recent >= self.config.max_clicks_per_window {
            return Verdict::Reject(FraudReason::WindowClickCap);
        }
        soft(
            counter.window_record(&window_key, now, window).await,
            "window.record",
        );

        if let Some(ua) = ctx.user_agent {
            if self.is_suspicious_user_agent(ua) {
                return Verdict::Reject(FraudReason::SuspiciousUserAgent);
            }
        }

        // Same IP + UA + creative clicking again within the duplicate window.
        if let (Some(ip), Some(ua)) = (ctx.ip, ctx.user_agent) {
            let fp_key = format!("click_fp:{}", click_fingerprint(ip, ua, &creative_id.to_string()));
            let duplicate_window = Duration::from_secs(self.config.duplicate_window_secs);
            if let Some(last) = soft(counter.last_seen(&fp_key).await, "fingerprint.get") {
                if last + chrono_span(duplicate_window) > now {
                    return Verdict::Reject(FraudReason::DuplicateClick);
                }
            }
            soft(
                counter
                    .mark_seen(
                        &fp_key,
                        now,
                        Duration::from_secs(self.config.fingerprint_ttl_secs),
                    )
                    .await,
                "fingerprint.set",
            );
        }

        Verdict::Accept
    }
}

fn chrono_span(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use motorads_cache::MemoryRateCounter;
    use motorads_core::fingerprint::session_hash;

    fn engine() -> FraudEngine {
        FraudEngine::new(AntiFraudConfig::default(), Arc::new(MemoryRateCounter::new()))
    }

    fn ctx<'a>(session: &'a str) -> FraudContext<'a> {
        FraudContext {
            session_hash: session,
            user_id: None,
            ip: Some("10.0.0.1"),
            user_agent: Some("Mozilla/5.0 (iPhone)"),
        }
    }

    fn secs(n: i64) -> ChronoDuration {
        ChronoDuration::seconds(n)
    }

    fn noon() -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_impression_viewability() {
        let e = engine();
        let s = session_hash("s");
        let c = ctx(&s);
        let id = Uuid::new_v4();
        let now = noon();

        let short = EventSignal::Impression(ViewportMetrics {
            viewport_seconds: 0.5,
            visible_ratio: 1.0,
        });
        assert_eq!(
            e.validate_event(&short, &c, id, now).await,
            Verdict::Reject(FraudReason::InsufficientViewport)
        );

        let hidden = EventSignal::Impression(ViewportMetrics {
            viewport_seconds: 2.0,
            visible_ratio: 0.3,
        });
        assert_eq!(
            e.validate_event(&hidden, &c, id, now).await,
            Verdict::Reject(FraudReason::InsufficientVisibleRatio)
        );

        let ok = EventSignal::Impression(ViewportMetrics {
            viewport_seconds: 1.0,
            visible_ratio: 0.5,
        });
        assert!(e.validate_event(&ok, &c, id, now).await.is_valid());
    }

    #[tokio::test]
    async fn test_lead_requires_user() {
        let e = engine();
        let s = session_hash("s");
        let mut c = ctx(&s);
        let id = Uuid::new_v4();
        assert_eq!(
            e.validate_event(&EventSignal::Lead, &c, id, noon()).await,
            Verdict::Reject(FraudReason::LeadWithoutUser)
        );
        c.user_id = Some("u-1");
        assert!(e.validate_event(&EventSignal::Lead, &c, id, noon()).await.is_valid());
    }

    #[tokio::test]
    async fn test_click_cooldown() {
        let e = engine();
        let s = session_hash("s");
        let c = ctx(&s);
        let id = Uuid::new_v4();
        let now = noon();

        assert!(e.validate_event(&EventSignal::Click, &c, id, now).await.is_valid());
        assert_eq!(
            e.validate_event(&EventSignal::Click, &c, id, now + secs(5)).await,
            Verdict::Reject(FraudReason::ClickCooldown)
        );
        // Another creative is unaffected by the first one's cooldown.
        let other = Uuid::new_v4();
        assert!(e
            .validate_event(&EventSignal::Click, &c, other, now + secs(5))
            .await
            .is_valid());
        assert!(e
            .validate_event(&EventSignal::Click, &c, id, now + secs(21))
            .await
            .is_valid());
    }

    #[tokio::test]
    async fn test_session_creative_daily_cap() {
        let config = AntiFraudConfig {
            click_cooldown_secs: 0,
            duplicate_window_secs: 0,
            max_clicks_per_session_creative: 3,
            ..AntiFraudConfig::default()
        };
        let e = FraudEngine::new(config, Arc::new(MemoryRateCounter::new()));
        let s = session_hash("s");
        let c = ctx(&s);
        let id = Uuid::new_v4();
        let now = noon();

        for i in 0..3 {
            assert!(e
                .validate_event(&EventSignal::Click, &c, id, now + secs(i))
                .await
                .is_valid());
        }
        assert_eq!(
            e.validate_event(&EventSignal::Click, &c, id, now + secs(10)).await,
            Verdict::Reject(FraudReason::SessionClickCap)
        );
    }

    #[tokio::test]
    async fn test_window_cap_spans_creatives() {
        let config = AntiFraudConfig {
            max_clicks_per_window: 2,
            ..AntiFraudConfig::default()
        };
        let e = FraudEngine::new(config, Arc::new(MemoryRateCounter::new()));
        let s = session_hash("s");
        let c = ctx(&s);
        let now = noon();

        for i in 0..2 {
            assert!(e
                .validate_event(&EventSignal::Click, &c, Uuid::new_v4(), now + secs(i))
                .await
                .is_valid());
        }
        assert_eq!(
            e.validate_event(&EventSignal::Click, &c, Uuid::new_v4(), now + secs(3))
                .await,
            Verdict::Reject(FraudReason::WindowClickCap)
        );
        // Window has moved past the earlier clicks.
        assert!(e
            .validate_event(&EventSignal::Click, &c, Uuid::new_v4(), now + secs(400))
            .await
            .is_valid());
    }

    #[tokio::test]
    async fn test_bot_user_agent() {
        let e = engine();
        let s = session_hash("s");
        let mut c = ctx(&s);
        c.user_agent = Some("python-requests/2.31");
        assert_eq!(
            e.validate_event(&EventSignal::Click, &c, Uuid::new_v4(), noon())
                .await,
            Verdict::Reject(FraudReason::SuspiciousUserAgent)
        );
        assert!(e.is_suspicious_user_agent("Googlebot/2.1"));
        assert!(!e.is_suspicious_user_agent("Mozilla/5.0 (Windows NT 10.0)"));
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_across_sessions() {
        let e = engine();
        let a = session_hash("a");
        let b = session_hash("b");
        let id = Uuid::new_v4();
        let now = noon();

        assert!(e.validate_event(&EventSignal::Click, &ctx(&a), id, now).await.is_valid());
        // Fresh session, same device and creative.
        assert_eq!(
            e.validate_event(&EventSignal::Click, &ctx(&b), id, now + secs(3)).await,
            Verdict::Reject(FraudReason::DuplicateClick)
        );
    }

    struct DownCounter;

    #[async_trait]
    impl RateCounter for DownCounter {
        async fn last_seen(&self, _: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
            anyhow::bail!("down")
        }
        async fn mark_seen(&self, _: &str, _: DateTime<Utc>, _: Duration) -> anyhow::Result<()> {
            anyhow::bail!("down")
        }
        async fn count(&self, _: &str) -> anyhow::Result<u64> {
            anyhow::bail!("down")
        }
        async fn increment(&self, _: &str, _: Duration) -> anyhow::Result<u64> {
            anyhow::bail!("down")
        }
        async fn window_count(&self, _: &str, _: DateTime<Utc>, _: Duration) -> anyhow::Result<u64> {
            anyhow::bail!("down")
        }
        async fn window_record(&self, _: &str, _: DateTime<Utc>, _: Duration) -> anyhow::Result<()> {
            anyhow::bail!("down")
        }
    }

    #[tokio::test]
    async fn test_counter_outage_fails_open_but_keeps_ua_check() {
        let e = FraudEngine::new(AntiFraudConfig::default(), Arc::new(DownCounter));
        let s = session_hash("s");
        let mut c = ctx(&s);
        assert!(e
            .validate_event(&EventSignal::Click, &c, Uuid::new_v4(), noon())
            .await
            .is_valid());
        c.user_agent = Some("curl/8.0");
        assert!(!e
            .validate_event(&EventSignal::Click, &c, Uuid::new_v4(), noon())
            .await
            .is_valid());
    }
}
