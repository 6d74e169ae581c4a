//! Request-path operations.
//!
//! This module contains the methods a serving edge calls per request:
//! - `get()` / `set()` / `del()` / `flush()` - cache access
//! - `admit()` - admission check for a client
//! - `dispatch()` - queue a backend call behind the pacing floor

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use super::FlowGate;
use crate::admission::{AdmissionError, ClientFingerprint};
use crate::pacing::TaskHandle;

impl<R, E> FlowGate<R, E>
where
    R: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Look up a cached response, consulting the remote tier on a miss.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &str) -> Option<R> {
        self.store.get(key).await
    }

    /// Cache a response. Returns the lifetime actually applied after
    /// clamping; `None` or a non-positive request means the default.
    #[tracing::instrument(skip(self, value), fields(key = %key))]
    pub fn set(&self, key: &str, value: R, ttl_secs: Option<i64>) -> Duration {
        self.store.set(key, value, ttl_secs)
    }

    /// Remove a key from both tiers. Returns whether the memory tier
    /// held it.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub fn del(&self, key: &str) -> bool {
        self.store.del(key)
    }

    /// Empty both tiers, returning how many entries were dropped.
    #[tracing::instrument(skip(self))]
    pub async fn flush(&self) -> usize {
        self.store.flush().await
    }

    /// Decide whether a client may proceed to the backend.
    ///
    /// Derives the fingerprint from the raw address and user agent, runs
    /// the identity gate and the rate window, and returns the fingerprint
    /// for request attribution when admitted. Rejections carry an HTTP
    /// status and, for rate limits, a retry-after hint.
    #[tracing::instrument(skip(self))]
    pub fn admit(
        &self,
        raw_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<ClientFingerprint, AdmissionError> {
        let client = ClientFingerprint::derive(raw_address, user_agent);
        self.admission.check(&client, user_agent)?;
        Ok(client)
    }

    /// Queue a backend call. It runs after every earlier task, separated
    /// from the previous dispatch by the pacing floor.
    ///
    /// Dropping the returned handle cancels the task if it has not been
    /// dispatched yet.
    #[tracing::instrument(skip(self, job))]
    pub fn dispatch<F>(&self, job: F) -> TaskHandle<R, E>
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.queue.submit(job)
    }
}
