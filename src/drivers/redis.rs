//! Remote L2 driver backed by Redis.
//!
//! Grounded on the teacher's `backends/redis_cache.rs`: same
//! `ConnectionManager`-for-auto-reconnect idiom, same `SCAN`-based pattern
//! scan, same `TTL`-sentinel handling, translated to the `Vec<u8>`-native
//! `Driver`/`L2Driver` boundary instead of `serde_json::Value`.

use crate::driver::{Driver, L2Driver};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

pub struct RedisDriver {
    conn: ConnectionManager,
}

impl RedisDriver {
    pub async fn connect_url(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(redis_url = %url, "connected redis driver");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Driver for RedisDriver {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(key).await.ok().flatten()
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            conn.set::<_, _, ()>(key, value).await?;
        } else {
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        }
        debug!(key, ttl_secs = ttl.as_secs(), "redis driver set");
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let count: usize = conn.del(keys).await?;
        Ok(count)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        // Deliberately unsupported: a global FLUSHDB would take out
        // unrelated keyspaces sharing the same Redis instance. Callers that
        // need a full wipe should scan+delete by their own key prefix.
        anyhow::bail!("RedisDriver does not support unscoped clear(); use scan_keys + delete")
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[async_trait]
impl L2Driver for RedisDriver {
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_with_ttl(&self, key: &str) -> Option<(Vec<u8>, Option<Duration>)> {
        let mut conn = self.conn.clone();
        let value: Vec<u8> = conn.get(key).await.ok()?;
        let ttl_secs: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .unwrap_or(-1);
        let ttl = if ttl_secs > 0 {
            Some(Duration::from_secs(ttl_secs as u64))
        } else {
            None
        };
        Some((value, ttl))
    }

    async fn scan_keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            cursor = next_cursor;
            keys.extend(batch);
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}
