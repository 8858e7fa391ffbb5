//! Short-TTL counters backing the anti-fraud heuristics.
//!
//! Read-increment-write races between concurrent requests are tolerated;
//! none of these operations are serialized across keys.

use crate::client::RedisCache;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Key-value counter capability with per-key TTL.
#[async_trait]
pub trait RateCounter: Send + Sync {
    /// Last timestamp stored under `key`, if not expired.
    async fn last_seen(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn mark_seen(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> anyhow::Result<()>;

    async fn count(&self, key: &str) -> anyhow::Result<u64>;

    /// Increment and return the new value. The TTL starts when the key is created.
    async fn increment(&self, key: &str, ttl: Duration) -> anyhow::Result<u64>;

    /// Occurrences recorded in `(now - window, now]`.
    async fn window_count(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<u64>;

    async fn window_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<()>;
}

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ─── In-memory ──────────────────────────────────────────────────────────

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Process-local counters for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryRateCounter {
    stamps: DashMap<String, Expiring<DateTime<Utc>>>,
    counts: DashMap<String, Expiring<u64>>,
    windows: DashMap<String, Vec<DateTime<Utc>>>,
}

impl MemoryRateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired keys and empty windows.
    pub fn evict_expired(&self, now: DateTime<Utc>, max_window: Duration) -> usize {
        let before = self.stamps.len() + self.counts.len() + self.windows.len();
        self.stamps.retain(|_, e| e.is_live());
        self.counts.retain(|_, e| e.is_live());
        let cutoff = window_start(now, max_window);
        self.windows.retain(|_, hits| {
            hits.retain(|t| *t > cutoff);
            !hits.is_empty()
        });
        before.saturating_sub(self.stamps.len() + self.counts.len() + self.windows.len())
    }
}

#[async_trait]
impl RateCounter for MemoryRateCounter {
    async fn last_seen(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self
            .stamps
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value))
    }

    async fn mark_seen(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> anyhow::Result<()> {
        self.stamps.insert(key.to_string(), Expiring::new(at, ttl));
        Ok(())
    }

    async fn count(&self, key: &str) -> anyhow::Result<u64> {
        Ok(self
            .counts
            .get(key)
            .filter(|e| e.is_live())
            .map_or(0, |e| e.value))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> anyhow::Result<u64> {
        let mut entry = self
            .counts
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(0, ttl));
        if !entry.is_live() {
            *entry = Expiring::new(0, ttl);
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn window_count(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<u64> {
        let cutoff = window_start(now, window);
        Ok(self.windows.get(key).map_or(0, |hits| {
            hits.iter().filter(|t| **t > cutoff && **t <= now).count() as u64
        }))
    }

    async fn window_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<()> {
        let cutoff = window_start(now, window);
        let mut hits = self.windows.entry(key.to_string()).or_default();
        hits.retain(|t| *t > cutoff);
        hits.push(now);
        Ok(())
    }
}

// ─── Redis ──────────────────────────────────────────────────────────────

/// Counters in Redis: plain keys with EX for stamps/counts, sorted sets
/// scored by epoch millis for sliding windows.
pub struct RedisRateCounter {
    redis: Arc<RedisCache>,
    prefix: String,
}

impl RedisRateCounter {
    pub fn new(redis: Arc<RedisCache>) -> Self {
        info!("Redis rate counter initialized");
        Self {
            redis,
            prefix: "motorads:fraud:".to_string(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl RateCounter for RedisRateCounter {
    async fn last_seen(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let mut conn = self.redis.connection().await?;
        let millis: Option<i64> = conn.get(self.key(key)).await?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    async fn mark_seen(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.redis.connection().await?;
        conn.set_ex::<_, _, ()>(self.key(key), at.timestamp_millis(), ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn count(&self, key: &str) -> anyhow::Result<u64> {
        let mut conn = self.redis.connection().await?;
        let count: Option<u64> = conn.get(self.key(key)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> anyhow::Result<u64> {
        let key = self.key(key);
        let mut conn = self.redis.connection().await?;
        let value: u64 = conn.incr(&key, 1u64).await?;
        if value == 1 {
            conn.expire::<_, ()>(&key, ttl_secs(ttl) as i64).await?;
        }
        Ok(value)
    }

    async fn window_count(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<u64> {
        let cutoff = window_start(now, window).timestamp_millis();
        let mut conn = self.redis.connection().await?;
        let count: u64 = redis::cmd("ZCOUNT")
            .arg(self.key(key))
            .arg(format!("({cutoff}"))
            .arg(now.timestamp_millis())
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn window_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> anyhow::Result<()> {
        let key = self.key(key);
        let cutoff = window_start(now, window).timestamp_millis();
        let member = format!("{}-{}", now.timestamp_millis(), uuid::Uuid::new_v4());
        let mut conn = self.redis.connection().await?;
        redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(&key)
            .arg(now.timestamp_millis())
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl_secs(window))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
