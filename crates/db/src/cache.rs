//! TTL key/value store backing agent rate-limit counters and the agent
//! read-through cache.
//!
//! Counter updates go through [`CounterCache::increment_within`], which checks
//! the ceiling and increments in one atomic step so concurrent admissions can
//! never push a counter past its cap.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;
use thiserror::Error;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("cache value error: {0}")]
    Value(String),
}

#[async_trait]
pub trait CounterCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Increments the counter at `key` unless it already reached `ceiling`.
    ///
    /// A missing or expired key starts a new window of length `ttl`; the
    /// expiry of a live window is not extended. Returns the new count, or
    /// `None` when the ceiling refused the increment.
    async fn increment_within(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, CacheError>;

    /// Undoes one increment. Never drops below zero.
    async fn decrement(&self, key: &str) -> Result<(), CacheError>;
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    fn count(&self) -> u64 {
        self.value.as_u64().unwrap_or(0)
    }
}

#[derive(Default)]
pub struct InMemoryCounterCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InMemoryCounterCache {
    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, CacheEntry>) -> T) -> T {
        match self.entries.lock() {
            Ok(mut entries) => f(&mut entries),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl CounterCache for InMemoryCounterCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        Ok(self.with_entries(|entries| {
            entries.get(key).filter(|entry| entry.is_live(now)).map(|entry| entry.value.clone())
        }))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.with_entries(|entries| {
            entries.insert(key.to_string(), CacheEntry { value, expires_at });
        });
        Ok(())
    }

    async fn increment_within(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, CacheError> {
        let now = Instant::now();
        Ok(self.with_entries(|entries| {
            let current = entries.get(key).filter(|entry| entry.is_live(now));
            let (count, expires_at) = match current {
                Some(entry) => (entry.count(), entry.expires_at),
                None => (0, now + ttl),
            };
            if count >= ceiling {
                return None;
            }

            let next = count + 1;
            entries.insert(key.to_string(), CacheEntry { value: Value::from(next), expires_at });
            Some(next)
        }))
    }

    async fn decrement(&self, key: &str) -> Result<(), CacheError> {
        let now = Instant::now();
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(key).filter(|entry| entry.is_live(now)) {
                entry.value = Value::from(entry.count().saturating_sub(1));
            }
        });
        Ok(())
    }
}

pub struct SqlCounterCache {
    pool: DbPool,
}

impl SqlCounterCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Removes expired rows. Reads already ignore them; this only reclaims space.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM agent_cache WHERE expires_at_ms <= ?")
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[async_trait]
impl CounterCache for SqlCounterCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let row = sqlx::query(
            "SELECT value_json FROM agent_cache WHERE cache_key = ? AND expires_at_ms > ?",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let raw = row.try_get::<String, _>("value_json")?;
            serde_json::from_str::<Value>(&raw).map_err(|error| {
                CacheError::Value(format!("invalid cached json for `{key}`: {error}"))
            })
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(&value)
            .map_err(|error| CacheError::Value(format!("could not encode `{key}`: {error}")))?;

        sqlx::query(
            "INSERT INTO agent_cache (cache_key, value_json, expires_at_ms) VALUES (?, ?, ?)
             ON CONFLICT(cache_key) DO UPDATE SET
                value_json = excluded.value_json,
                expires_at_ms = excluded.expires_at_ms",
        )
        .bind(key)
        .bind(encoded)
        .bind(expiry_ms(ttl))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_within(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, CacheError> {
        if ceiling == 0 {
            return Ok(None);
        }

        // Single upsert: an expired row restarts at 1, a live row below the
        // ceiling is bumped, a live row at the ceiling matches no WHERE and
        // returns nothing.
        let row = sqlx::query(
            "INSERT INTO agent_cache (cache_key, value_json, expires_at_ms) VALUES (?1, '1', ?2)
             ON CONFLICT(cache_key) DO UPDATE SET
                value_json = CASE
                    WHEN agent_cache.expires_at_ms <= ?3 THEN '1'
                    ELSE CAST(CAST(agent_cache.value_json AS INTEGER) + 1 AS TEXT)
                END,
                expires_at_ms = CASE
                    WHEN agent_cache.expires_at_ms <= ?3 THEN excluded.expires_at_ms
                    ELSE agent_cache.expires_at_ms
                END
             WHERE agent_cache.expires_at_ms <= ?3
                OR CAST(agent_cache.value_json AS INTEGER) < ?4
             RETURNING CAST(value_json AS INTEGER) AS count",
        )
        .bind(key)
        .bind(expiry_ms(ttl))
        .bind(now_ms())
        .bind(i64::try_from(ceiling).unwrap_or(i64::MAX))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let count = row.try_get::<i64, _>("count")?;
            u64::try_from(count)
                .map_err(|_| CacheError::Value(format!("negative counter for `{key}`: {count}")))
        })
        .transpose()
    }

    async fn decrement(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query(
            "UPDATE agent_cache
             SET value_json = CAST(MAX(CAST(value_json AS INTEGER) - 1, 0) AS TEXT)
             WHERE cache_key = ? AND expires_at_ms > ?",
        )
        .bind(key)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
