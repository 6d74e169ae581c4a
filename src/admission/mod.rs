// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Admission control.
//!
//! Every request is accounted against a [`ClientFingerprint`] in a sliding
//! rate window. The gate is deliberately strict about identity: a client
//! whose address cannot be parsed, or whose user agent looks like
//! automation, is rejected before the window is even consulted. Pattern
//! heuristics run after the verdict and only ever log.

pub mod fingerprint;
pub mod heuristics;

pub use fingerprint::{ClientFingerprint, UNKNOWN_ADDR};
pub use heuristics::{AbuseSignals, HeuristicConfig};

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics;

/// Substrings that mark a user agent as automation.
const AGENT_BLOCKLIST: &[&str] = &[
    "bot",
    "crawl",
    "spider",
    "scrape",
    "curl",
    "wget",
    "python-requests",
    "go-http-client",
    "script",
    "headless",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The client failed the identity gate and will never be admitted as-is.
    #[error("client rejected: {reason}")]
    InvalidIdentity { reason: &'static str },
    /// The client exhausted its rate window.
    #[error("rate limit exceeded: {current} hits against a limit of {limit}, retry in {retry_after:?}")]
    RateLimited {
        current: usize,
        limit: usize,
        retry_after: Duration,
    },
}

impl AdmissionError {
    /// How long the client should back off, when that is knowable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::InvalidIdentity { .. } => None,
        }
    }

    /// HTTP status this rejection maps to at a serving edge.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidIdentity { .. } => 403,
            Self::RateLimited { .. } => 429,
        }
    }
}

#[derive(Debug, Default)]
struct FingerprintHistory {
    hits: VecDeque<Instant>,
    burst_flagged: bool,
    uniform_flagged: bool,
}

/// Report from a history pruning pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct HistoryPrune {
    pub scanned: usize,
    pub timestamps_dropped: usize,
    pub removed: usize,
}

/// Sliding-window admission controller keyed by client fingerprint.
pub struct AdmissionController {
    histories: DashMap<String, FingerprintHistory>,
    limit: usize,
    window: Duration,
    history_cap: usize,
    heuristics: HeuristicConfig,
}

impl AdmissionController {
    /// `history_cap` bounds per-client retained timestamps; it is raised to
    /// `limit + 1` if smaller so a full window plus the denied hit that
    /// proved it always fits.
    pub fn new(limit: usize, window: Duration, history_cap: usize, heuristics: HeuristicConfig) -> Self {
        let limit = limit.max(1);
        Self {
            histories: DashMap::new(),
            limit,
            window,
            history_cap: history_cap.max(limit + 1),
            heuristics,
        }
    }

    /// Decide whether this request may proceed.
    ///
    /// Every call is recorded against the fingerprint's window, allowed or
    /// not, so hammering a closed gate pushes recovery further out.
    pub fn check(
        &self,
        client: &ClientFingerprint,
        user_agent: Option<&str>,
    ) -> Result<(), AdmissionError> {
        self.check_at(client, user_agent, Instant::now())
    }

    fn check_at(
        &self,
        client: &ClientFingerprint,
        user_agent: Option<&str>,
        now: Instant,
    ) -> Result<(), AdmissionError> {
        if let Err(reason) = identity_gate(client, user_agent) {
            metrics::record_admission("rejected_identity");
            debug!(client = %client, reason, "admission refused at identity gate");
            return Err(AdmissionError::InvalidIdentity { reason });
        }

        let mut history = self.histories.entry(client.key()).or_default();

        while let Some(oldest) = history.hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                history.hits.pop_front();
            } else {
                break;
            }
        }

        let current = history.hits.len();
        let verdict = if current < self.limit {
            Ok(())
        } else {
            let oldest = history.hits.front().copied().unwrap_or(now);
            let retry_after = (oldest + self.window).saturating_duration_since(now);
            Err(AdmissionError::RateLimited {
                current,
                limit: self.limit,
                retry_after,
            })
        };

        history.hits.push_back(now);
        while history.hits.len() > self.history_cap {
            history.hits.pop_front();
        }

        let signals = heuristics::evaluate(&self.heuristics, &history.hits, now);
        if signals.burst && !history.burst_flagged {
            metrics::record_abuse_signal("burst");
            warn!(client = %client, hits = history.hits.len(), "burst traffic pattern");
        }
        if signals.uniform_spacing && !history.uniform_flagged {
            metrics::record_abuse_signal("uniform_spacing");
            warn!(
                client = %client,
                samples = history.hits.len(),
                "machine-regular request spacing"
            );
        }
        history.burst_flagged = signals.burst;
        history.uniform_flagged = signals.uniform_spacing;

        // The shard guard must go before any whole-map operation.
        drop(history);
        metrics::set_tracked_fingerprints(self.histories.len());

        match &verdict {
            Ok(()) => metrics::record_admission("allowed"),
            Err(err) => {
                metrics::record_admission("rejected_rate");
                debug!(client = %client, error = %err, "admission refused by rate window");
            }
        }
        verdict
    }

    /// Number of distinct fingerprints currently tracked.
    pub fn tracked_fingerprints(&self) -> usize {
        self.histories.len()
    }

    /// Total retained timestamps across all fingerprints.
    pub fn tracked_hits(&self) -> usize {
        self.histories.iter().map(|entry| entry.hits.len()).sum()
    }

    /// Drop timestamps older than `retention`, enforce `cap` per client, and
    /// forget clients left with no history.
    pub fn prune_histories(&self, now: Instant, retention: Duration, cap: usize) -> HistoryPrune {
        let mut report = HistoryPrune::default();

        self.histories.retain(|_, history| {
            report.scanned += 1;

            while let Some(oldest) = history.hits.front() {
                if now.saturating_duration_since(*oldest) >= retention {
                    history.hits.pop_front();
                    report.timestamps_dropped += 1;
                } else {
                    break;
                }
            }
            while history.hits.len() > cap {
                history.hits.pop_front();
                report.timestamps_dropped += 1;
            }

            if history.hits.is_empty() {
                report.removed += 1;
                false
            } else {
                true
            }
        });

        metrics::set_tracked_fingerprints(self.histories.len());
        report
    }
}

fn identity_gate(client: &ClientFingerprint, user_agent: Option<&str>) -> Result<(), &'static str> {
    if !client.is_known() {
        return Err("unparsable client address");
    }

    let agent = user_agent.map(str::trim).unwrap_or("");
    if agent.is_empty() {
        return Err("missing user agent");
    }
    if agent == "-" {
        return Err("placeholder user agent");
    }

    let lowered = agent.to_lowercase();
    if AGENT_BLOCKLIST.iter().any(|token| lowered.contains(token)) {
        return Err("automation user agent");
    }

    Ok(())
}
