//! Redis-backed remote tier.
//!
//! Uses `ConnectionManager`, which re-establishes dropped connections on
//! its own. Mid-life outages therefore heal without help; only an endpoint
//! that was never reachable needs the engine's reconnect ticker.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

use crate::resilience::retry::{retry, RetryConfig};
use crate::store::traits::{RemoteTier, StoreError};

/// How many keys one SCAN page requests during a namespace clear.
const SCAN_PAGE: usize = 200;

pub struct RedisTier {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisTier {
    /// Connect to a Redis endpoint, retrying briefly before giving up.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Backend(format!("invalid redis url: {}", e)))?;

        let conn = retry("remote_connect", &RetryConfig::startup(), || {
            let client = client.clone();
            async move { ConnectionManager::new(client).await }
        })
        .await
        .map_err(|e: redis::RedisError| StoreError::Backend(e.to_string()))?;

        debug!(prefix = %prefix, "redis tier connected");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl RemoteTier for RedisTier {
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(self.prefixed_key(key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(value)
    }

    async fn store(&self, key: &str, envelope: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.prefixed_key(key), envelope, ttl_secs)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.prefixed_key(key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        // Restarting the scan after a failure only re-deletes, so the whole
        // walk can sit inside the retry.
        retry("remote_clear", &RetryConfig::query(), || {
            let conn = self.conn.clone();
            let pattern = format!("{}:*", self.prefix);
            async move { clear_matching(conn, pattern).await }
        })
        .await
    }

    async fn probe(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Walk the keyspace with SCAN and delete matches in pipelined pages.
async fn clear_matching(mut conn: ConnectionManager, pattern: String) -> Result<usize, StoreError> {
    let mut cursor: u64 = 0;
    let mut removed = 0usize;

    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(SCAN_PAGE)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if !keys.is_empty() {
            let mut pipe = redis::pipe();
            for key in &keys {
                pipe.del(key).ignore();
            }
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            removed += keys.len();
        }

        cursor = next;
        if cursor == 0 {
            break;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_tier() -> RedisTier {
        RedisTier::connect("redis://127.0.0.1:6379", "fgtest")
            .await
            .expect("redis not reachable")
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_store_fetch_remove() {
        let tier = test_tier().await;

        tier.store("roundtrip", r#"{"v":1}"#, Duration::from_secs(60))
            .await
            .unwrap();
        let fetched = tier.fetch("roundtrip").await.unwrap();
        assert_eq!(fetched.as_deref(), Some(r#"{"v":1}"#));

        tier.remove("roundtrip").await.unwrap();
        assert_eq!(tier.fetch("roundtrip").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_server_side_expiry() {
        let tier = test_tier().await;

        tier.store("expiring", "x", Duration::from_secs(1)).await.unwrap();
        assert!(tier.fetch("expiring").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(tier.fetch("expiring").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_clear_only_touches_namespace() {
        let tier = test_tier().await;
        let other = RedisTier::connect("redis://127.0.0.1:6379", "fgother")
            .await
            .unwrap();

        for i in 0..5 {
            tier.store(&format!("k{}", i), "x", Duration::from_secs(60))
                .await
                .unwrap();
        }
        other.store("kept", "x", Duration::from_secs(60)).await.unwrap();

        let removed = tier.clear().await.unwrap();
        assert!(removed >= 5);
        assert_eq!(tier.fetch("k0").await.unwrap(), None);
        assert!(other.fetch("kept").await.unwrap().is_some());

        other.clear().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_probe() {
        let tier = test_tier().await;
        tier.probe().await.unwrap();
    }
}
