//! Time-to-live resolution for cache writes.
//!
//! Callers request TTLs in whole seconds and may pass anything: absent,
//! zero, negative, or absurdly large. The policy clamps every request into
//! `[1, max]` seconds so no slot outlives the configured ceiling and no
//! slot is ever stored without an expiry. Zero is not a "keep forever"
//! escape hatch; it resolves to the default like any other non-positive
//! request.
//!
//! # Example
//!
//! ```
//! use flow_gate::TtlPolicy;
//! use std::time::Duration;
//!
//! let policy = TtlPolicy::new(3600, 30 * 24 * 3600);
//!
//! assert_eq!(policy.resolve(None), Duration::from_secs(3600));
//! assert_eq!(policy.resolve(Some(0)), Duration::from_secs(3600));
//! assert_eq!(policy.resolve(Some(120)), Duration::from_secs(120));
//! assert_eq!(policy.resolve(Some(i64::MAX)), Duration::from_secs(30 * 24 * 3600));
//! ```

use std::time::Duration;

/// Clamps requested TTLs into a configured range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    default: Duration,
    max: Duration,
}

impl TtlPolicy {
    /// Build a policy from whole-second bounds.
    ///
    /// Both bounds are forced to at least one second; a default above the
    /// maximum is pulled down to it.
    #[must_use]
    pub fn new(default_secs: u64, max_secs: u64) -> Self {
        let max = Duration::from_secs(max_secs.max(1));
        let default = Duration::from_secs(default_secs.max(1)).min(max);
        Self { default, max }
    }

    /// Resolve a requested TTL to the effective one.
    ///
    /// Absent or non-positive requests resolve to the default; everything
    /// else is capped at the maximum.
    #[must_use]
    pub fn resolve(&self, requested_secs: Option<i64>) -> Duration {
        match requested_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64).min(self.max),
            _ => self.default,
        }
    }

    /// The TTL applied when the caller requests nothing usable.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default
    }

    /// Hard ceiling for any accepted request.
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        self.max
    }
}
