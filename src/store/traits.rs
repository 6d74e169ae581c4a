//! Remote tier abstraction.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from the remote cache tier.
///
/// These never escape the tiered store: every failure is absorbed into
/// local-only operation and logged. Callers of the store see `Option` and
/// `()`, not `Result`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("remote backend error: {0}")]
    Backend(String),

    #[error("encode/decode error: {0}")]
    Codec(String),

    #[error("remote operation timed out")]
    Timeout,
}

/// An externally reachable key/value tier.
///
/// Values cross this boundary as opaque envelope strings; the tiered store
/// owns the envelope format. Implementations must be safe to call
/// concurrently and cheap to share behind an `Arc`.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Fetch the raw envelope stored under `key`, if any.
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store an envelope under `key`, expiring server-side after `ttl`.
    async fn store(&self, key: &str, envelope: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every key in this tier's namespace, returning how many went.
    async fn clear(&self) -> Result<usize, StoreError>;

    /// Round-trip liveness check.
    async fn probe(&self) -> Result<(), StoreError>;
}
