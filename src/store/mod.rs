//! Two-tier cache store.
//!
//! Reads check the in-process tier first and fall back to the remote tier,
//! promoting remote hits back into memory with their remaining lifetime.
//! Writes land in memory synchronously and replicate to the remote tier in
//! the background, so a slow or absent remote never blocks the caller.
//!
//! Remote entries travel as a small versioned JSON envelope carrying the
//! payload plus its original store time and lifetime. Freshness is decided
//! from the envelope at read time, which keeps expiry consistent even when
//! the remote backend's own expiry lags.

pub mod memory;
pub mod redis;
pub mod traits;

pub use memory::MemoryTier;
pub use redis::RedisTier;
pub use traits::{RemoteTier, StoreError};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::metrics;
use crate::ttl::TtlPolicy;

const ENVELOPE_VERSION: u8 = 1;

/// Wire format for entries in the remote tier.
#[derive(Serialize, Deserialize)]
struct RemoteEnvelope<V> {
    v: u8,
    stored_at_ms: u64,
    ttl_secs: u64,
    payload: V,
}

/// Memory tier fronting an optional remote tier.
pub struct TieredStore<V> {
    local: MemoryTier<V>,
    remote: Arc<RwLock<Option<Arc<dyn RemoteTier>>>>,
    ttl: TtlPolicy,
    remote_timeout: Duration,
}

impl<V> TieredStore<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new(max_entries: usize, ttl: TtlPolicy, remote_timeout: Duration) -> Self {
        Self {
            local: MemoryTier::new(max_entries),
            remote: Arc::new(RwLock::new(None)),
            ttl,
            remote_timeout,
        }
    }

    /// Attach a remote tier. Reads and writes start using it immediately.
    pub fn attach_remote(&self, tier: Arc<dyn RemoteTier>) {
        *self.remote.write() = Some(tier);
        metrics::set_remote_attached(true);
    }

    pub fn remote_attached(&self) -> bool {
        self.remote.read().is_some()
    }

    pub(crate) fn remote_handle(&self) -> Option<Arc<dyn RemoteTier>> {
        self.remote.read().clone()
    }

    /// Look up a key, consulting the remote tier on a local miss.
    ///
    /// Any remote failure or timeout degrades to a miss; the caller cannot
    /// tell an outage from an absent key, which is the point.
    pub async fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.local.get(key) {
            metrics::record_tier_operation("local", "get", "hit");
            return Some(value);
        }
        metrics::record_tier_operation("local", "get", "miss");

        let remote = self.remote_handle()?;
        let started = Instant::now();
        let fetched = match timeout(self.remote_timeout, remote.fetch(key)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                metrics::record_remote_error("get");
                warn!(key, error = %err, "remote fetch failed");
                return None;
            }
            Err(_) => {
                metrics::record_remote_timeout("get");
                warn!(key, timeout_ms = self.remote_timeout.as_millis() as u64, "remote fetch timed out");
                return None;
            }
        };
        metrics::record_tier_latency("remote", "get", started.elapsed());

        let raw = match fetched {
            Some(raw) => raw,
            None => {
                metrics::record_tier_operation("remote", "get", "miss");
                return None;
            }
        };

        match decode_at::<V>(&raw, unix_ms()) {
            Some((value, remaining)) => {
                metrics::record_tier_operation("remote", "get", "hit");
                metrics::record_promotion();
                self.local.insert(key, value.clone(), remaining);
                Some(value)
            }
            None => {
                debug!(key, "remote entry stale or unreadable, treating as miss");
                metrics::record_tier_operation("remote", "get", "rejected");
                None
            }
        }
    }

    /// Store a value under the resolved lifetime, returning that lifetime.
    ///
    /// The memory tier is updated before this returns; replication to the
    /// remote tier happens on a detached task. Must be called from within a
    /// Tokio runtime when a remote tier is attached.
    pub fn set(&self, key: &str, value: V, requested_ttl_secs: Option<i64>) -> Duration {
        let ttl = self.ttl.resolve(requested_ttl_secs);
        self.local.insert(key, value.clone(), ttl);
        metrics::record_tier_operation("local", "set", "ok");

        if let Some(remote) = self.remote_handle() {
            match encode(&value, ttl) {
                Ok(envelope) => {
                    let key = key.to_string();
                    let budget = self.remote_timeout;
                    tokio::spawn(async move {
                        match timeout(budget, remote.store(&key, &envelope, ttl)).await {
                            Ok(Ok(())) => metrics::record_tier_operation("remote", "set", "ok"),
                            Ok(Err(err)) => {
                                metrics::record_remote_error("set");
                                warn!(key = %key, error = %err, "remote store failed");
                            }
                            Err(_) => {
                                metrics::record_remote_timeout("set");
                                warn!(key = %key, "remote store timed out");
                            }
                        }
                    });
                }
                Err(err) => {
                    warn!(key, error = %err, "payload not serializable for remote tier");
                }
            }
        }

        ttl
    }

    /// Drop a key from both tiers. Returns whether the memory tier held it.
    pub fn del(&self, key: &str) -> bool {
        let removed = self.local.remove(key);
        metrics::record_tier_operation("local", "del", if removed { "hit" } else { "miss" });

        if let Some(remote) = self.remote_handle() {
            let key = key.to_string();
            let budget = self.remote_timeout;
            tokio::spawn(async move {
                match timeout(budget, remote.remove(&key)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        metrics::record_remote_error("del");
                        warn!(key = %key, error = %err, "remote remove failed");
                    }
                    Err(_) => {
                        metrics::record_remote_timeout("del");
                        warn!(key = %key, "remote remove timed out");
                    }
                }
            });
        }

        removed
    }

    /// Empty both tiers, returning how many entries were dropped in total.
    ///
    /// The remote side is awaited rather than detached so callers can trust
    /// the count; its SCAN walk is already retried and paged internally.
    pub async fn flush(&self) -> usize {
        let mut total = self.local.clear();

        if let Some(remote) = self.remote_handle() {
            match remote.clear().await {
                Ok(removed) => total += removed,
                Err(err) => {
                    metrics::record_remote_error("flush");
                    warn!(error = %err, "remote clear failed, local tier flushed anyway");
                }
            }
        }

        total
    }

    pub fn purge_expired(&self) -> usize {
        self.local.purge_expired()
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    #[cfg(test)]
    fn local(&self) -> &MemoryTier<V> {
        &self.local
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn encode<V: Serialize>(value: &V, ttl: Duration) -> Result<String, StoreError> {
    let envelope = RemoteEnvelope {
        v: ENVELOPE_VERSION,
        stored_at_ms: unix_ms(),
        ttl_secs: ttl.as_secs().max(1),
        payload: value,
    };
    serde_json::to_string(&envelope).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Decode a remote envelope, returning the payload and its remaining
/// lifetime as of `now_ms`. Unknown versions, parse failures, and entries
/// past their lifetime all come back as `None`.
fn decode_at<V: DeserializeOwned>(raw: &str, now_ms: u64) -> Option<(V, Duration)> {
    let envelope: RemoteEnvelope<V> = serde_json::from_str(raw).ok()?;
    if envelope.v != ENVELOPE_VERSION {
        return None;
    }

    let age_ms = now_ms.saturating_sub(envelope.stored_at_ms);
    let ttl_ms = envelope.ttl_secs.saturating_mul(1000);
    if age_ms >= ttl_ms {
        return None;
    }

    // Promotions keep at least a second of life so a hit is usable.
    let remaining = Duration::from_millis((ttl_ms - age_ms).max(1000));
    Some((envelope.payload, remaining))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockRemote {
        map: Mutex<HashMap<String, String>>,
        fail: AtomicBool,
        fetches: AtomicUsize,
        stores: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RemoteTier for MockRemote {
        async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("mock outage".into()));
            }
            Ok(self.map.lock().unwrap().get(key).cloned())
        }

        async fn store(&self, key: &str, envelope: &str, _ttl: Duration) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("mock outage".into()));
            }
            self.map
                .lock()
                .unwrap()
                .insert(key.to_string(), envelope.to_string());
            self.stores.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.map.lock().unwrap().remove(key);
            Ok(())
        }

        async fn clear(&self) -> Result<usize, StoreError> {
            let mut map = self.map.lock().unwrap();
            let removed = map.len();
            map.clear();
            Ok(removed)
        }

        async fn probe(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn test_store() -> (TieredStore<String>, Arc<MockRemote>) {
        let store = TieredStore::new(100, TtlPolicy::new(3600, 86_400), Duration::from_millis(500));
        let remote = Arc::new(MockRemote::default());
        store.attach_remote(remote.clone());
        (store, remote)
    }

    async fn wait_for_stores(remote: &MockRemote, count: usize) {
        for _ in 0..200 {
            if remote.stores.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("remote never observed {} stores", count);
    }

    #[tokio::test]
    async fn test_local_hit_skips_remote() {
        let (store, remote) = test_store();

        store.set("greeting", "hello".to_string(), None);
        assert_eq!(store.get("greeting").await, Some("hello".to_string()));
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_hit_promotes_to_local() {
        let (store, remote) = test_store();

        let envelope = encode(&"cached".to_string(), Duration::from_secs(600)).unwrap();
        remote
            .map
            .lock()
            .unwrap()
            .insert("warm".to_string(), envelope);

        assert_eq!(store.get("warm").await, Some("cached".to_string()));
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);

        // Second read must come from the promoted local copy.
        assert_eq!(store.get("warm").await, Some("cached".to_string()));
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
        assert!(store.local().remaining_ttl("warm").unwrap() <= Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_set_replicates_to_remote() {
        let (store, remote) = test_store();

        store.set("replicated", "value".to_string(), Some(120));
        wait_for_stores(&remote, 1).await;

        let raw = remote.map.lock().unwrap().get("replicated").cloned().unwrap();
        let (payload, remaining) = decode_at::<String>(&raw, unix_ms()).unwrap();
        assert_eq!(payload, "value");
        assert!(remaining <= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_remote_outage_degrades_to_miss() {
        let (store, remote) = test_store();
        remote.fail.store(true, Ordering::SeqCst);

        // Reads degrade instead of erroring, and writes still land locally.
        assert_eq!(store.get("absent").await, None);
        store.set("local_only", "kept".to_string(), None);
        assert_eq!(store.get("local_only").await, Some("kept".to_string()));
    }

    #[tokio::test]
    async fn test_del_removes_both_tiers() {
        let (store, remote) = test_store();

        store.set("doomed", "x".to_string(), None);
        wait_for_stores(&remote, 1).await;

        assert!(store.del("doomed"));
        assert_eq!(store.get("doomed").await, None);

        for _ in 0..200 {
            if remote.map.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("remote copy was never removed");
    }

    #[tokio::test]
    async fn test_flush_counts_both_tiers() {
        let (store, remote) = test_store();

        store.set("a", "1".to_string(), None);
        store.set("b", "2".to_string(), None);
        wait_for_stores(&remote, 2).await;

        assert_eq!(store.flush().await, 4);
        assert_eq!(store.local_len(), 0);
        assert!(remote.map.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_without_remote_everything_still_works() {
        let store: TieredStore<String> =
            TieredStore::new(10, TtlPolicy::new(3600, 86_400), Duration::from_millis(500));
        assert!(!store.remote_attached());

        store.set("solo", "value".to_string(), None);
        assert_eq!(store.get("solo").await, Some("value".to_string()));
        assert!(store.del("solo"));
        assert_eq!(store.flush().await, 0);
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let raw = r#"{"v":2,"stored_at_ms":0,"ttl_secs":3600,"payload":"x"}"#;
        assert!(decode_at::<String>(raw, 1000).is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_at::<String>("not json", 1000).is_none());
        assert!(decode_at::<String>(r#"{"v":1}"#, 1000).is_none());
    }

    #[test]
    fn test_decode_enforces_envelope_lifetime() {
        let raw = encode(&"x".to_string(), Duration::from_secs(5)).unwrap();

        let now = unix_ms();
        assert!(decode_at::<String>(&raw, now).is_some());
        assert!(decode_at::<String>(&raw, now + 4_000).is_some());
        assert!(decode_at::<String>(&raw, now + 6_000).is_none());
    }

    #[test]
    fn test_decode_reports_remaining_lifetime() {
        let raw = encode(&"x".to_string(), Duration::from_secs(100)).unwrap();

        let now = unix_ms();
        let (_, remaining) = decode_at::<String>(&raw, now + 40_000).unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining >= Duration::from_secs(59));
    }

    #[test]
    fn test_decode_clock_skew_counts_as_fresh() {
        // A writer ahead of our clock produces a future stored_at; the age
        // saturates to zero instead of underflowing.
        let raw = encode(&"x".to_string(), Duration::from_secs(10)).unwrap();
        assert!(decode_at::<String>(&raw, 0).is_some());
    }
}
