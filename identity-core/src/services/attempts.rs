//! Failed-attempt counters with a fixed window.
//!
//! The counter lives outside the process (Redis) when instances share load;
//! the in-memory variant serves single-process deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use std::sync::Arc;

use crate::config::RedisConfig;
use crate::repository::RepositoryError;
use crate::services::clock::Clock;

#[async_trait]
pub trait AttemptCounter: Send + Sync {
    /// Count one failure and return the total in the current window.
    async fn record_failure(&self, key: &str) -> Result<u64, RepositoryError>;

    /// Failures in the current window.
    async fn count(&self, key: &str) -> Result<u64, RepositoryError>;

    async fn reset(&self, key: &str) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct RedisAttemptCounter {
    manager: ConnectionManager,
    prefix: String,
    window_seconds: u64,
}

impl RedisAttemptCounter {
    pub async fn new(
        config: &RedisConfig,
        prefix: impl Into<String>,
        window_seconds: u64,
    ) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            manager,
            prefix: prefix.into(),
            window_seconds,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub async fn health_check(&self) -> Result<(), RepositoryError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl AttemptCounter for RedisAttemptCounter {
    async fn record_failure(&self, key: &str) -> Result<u64, RepositoryError> {
        let mut conn = self.manager.clone();
        let key = self.key(key);

        // The window starts at the first failure; later failures do not push
        // the expiry out.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(&key)
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.window_seconds)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn count(&self, key: &str) -> Result<u64, RepositoryError> {
        let mut conn = self.manager.clone();
        let count: Option<u64> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(count.unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> Result<(), RepositoryError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Process-local counter driven by the injected clock.
pub struct InMemoryAttemptCounter {
    windows: DashMap<String, (u64, DateTime<Utc>)>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryAttemptCounter {
    pub fn new(window_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            window: Duration::seconds(window_seconds as i64),
            clock,
        }
    }
}

#[async_trait]
impl AttemptCounter for InMemoryAttemptCounter {
    async fn record_failure(&self, key: &str) -> Result<u64, RepositoryError> {
        let now = self.clock.now();
        // Prune every lapsed window, not just this key's.
        self.windows.retain(|_, (_, start)| now < *start + self.window);
        let mut entry = self.windows.entry(key.to_string()).or_insert((0, now));
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn count(&self, key: &str) -> Result<u64, RepositoryError> {
        let now = self.clock.now();
        self.windows
            .remove_if(key, |_, (_, start)| now >= *start + self.window);
        Ok(self.windows.get(key).map_or(0, |entry| entry.0))
    }

    async fn reset(&self, key: &str) -> Result<(), RepositoryError> {
        self.windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;

    #[tokio::test]
    async fn test_fixed_window_counts_and_expires() {
        let clock = Arc::new(ManualClock::default());
        let counter = InMemoryAttemptCounter::new(900, clock.clone());

        assert_eq!(counter.record_failure("p1").await.unwrap(), 1);
        clock.advance(Duration::minutes(10));
        assert_eq!(counter.record_failure("p1").await.unwrap(), 2);
        assert_eq!(counter.count("p1").await.unwrap(), 2);
        assert_eq!(counter.count("p2").await.unwrap(), 0);

        // Window is anchored at the first failure.
        clock.advance(Duration::minutes(5));
        assert_eq!(counter.count("p1").await.unwrap(), 0);
        assert_eq!(counter.record_failure("p1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lapsed_windows_are_dropped() {
        let clock = Arc::new(ManualClock::default());
        let counter = InMemoryAttemptCounter::new(900, clock.clone());
        for key in ["p1", "p2", "p3"] {
            counter.record_failure(key).await.unwrap();
        }
        assert_eq!(counter.windows.len(), 3);

        clock.advance(Duration::minutes(16));
        assert_eq!(counter.count("p1").await.unwrap(), 0);
        assert_eq!(counter.windows.len(), 2);

        // Any new failure sweeps the rest.
        assert_eq!(counter.record_failure("p4").await.unwrap(), 1);
        assert_eq!(counter.windows.len(), 1);
        assert!(counter.windows.contains_key("p4"));
    }

    #[tokio::test]
    async fn test_reset_clears_counter() {
        let clock = Arc::new(ManualClock::default());
        let counter = InMemoryAttemptCounter::new(900, clock);
        counter.record_failure("p1").await.unwrap();
        counter.reset("p1").await.unwrap();
        assert_eq!(counter.count("p1").await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_redis_counter() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        };
        let counter = RedisAttemptCounter::new(&config, "mfa_attempts_test", 60)
            .await
            .unwrap();
        counter.reset("p1").await.unwrap();
        assert_eq!(counter.record_failure("p1").await.unwrap(), 1);
        assert_eq!(counter.record_failure("p1").await.unwrap(), 2);
        assert_eq!(counter.count("p1").await.unwrap(), 2);
        counter.reset("p1").await.unwrap();
    }
}
