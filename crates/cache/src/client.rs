//! Redis client shared by the listing cache (L2) and the anti-fraud counters.

use motorads_core::config::RedisConfig;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Thin JSON-over-Redis wrapper.
pub struct RedisCache {
    client: redis::Client,
    connect_timeout: Duration,
    ttl_secs: u64,
}

impl RedisCache {
    /// Connect to Redis and verify connectivity with PING.
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let cache = Self {
            client,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            ttl_secs: config.ttl_secs,
        };

        let mut conn = cache.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(cache)
    }

    pub async fn connection(&self) -> anyhow::Result<MultiplexedConnection> {
        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("redis connect timed out"))??;
        Ok(conn)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn.get(key).await?;
        match data {
            Some(json) => {
                metrics::counter!("cache.l2.hit").increment(1);
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => {
                metrics::counter!("cache.l2.miss").increment(1);
                debug!(key = key, "Redis miss");
                Ok(None)
            }
        }
    }

    /// Store a value; `ttl_secs` of `None` uses the configured default.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, json, ttl_secs.unwrap_or(self.ttl_secs))
            .await?;
        Ok(())
    }
}
