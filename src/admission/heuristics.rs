// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Advisory traffic-pattern heuristics.
//!
//! These inspect a client's recent hit timestamps for automation tells. They
//! only ever raise signals for logging and metrics; the admission verdict is
//! decided by the rate window alone, so a false positive here costs nothing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tuning for the pattern detectors.
#[derive(Debug, Clone)]
pub struct HeuristicConfig {
    /// Window over which a burst is counted.
    pub burst_window: Duration,
    /// Hits inside the burst window that count as a burst.
    pub burst_threshold: usize,
    /// Minimum hits before spacing variance is meaningful.
    pub uniform_min_samples: usize,
    /// Inter-arrival variance (seconds squared) below which spacing is
    /// considered machine-regular.
    pub uniform_variance_threshold: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            burst_window: Duration::from_secs(10),
            burst_threshold: 3,
            uniform_min_samples: 5,
            uniform_variance_threshold: 0.01,
        }
    }
}

/// Signals raised by a single evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbuseSignals {
    pub burst: bool,
    pub uniform_spacing: bool,
}

impl AbuseSignals {
    pub fn any(&self) -> bool {
        self.burst || self.uniform_spacing
    }
}

/// Evaluate a client's hit history as of `now`.
///
/// `hits` must be ordered oldest to newest, which is how the admission
/// controller maintains it.
pub fn evaluate(config: &HeuristicConfig, hits: &VecDeque<Instant>, now: Instant) -> AbuseSignals {
    AbuseSignals {
        burst: burst_detected(config, hits, now),
        uniform_spacing: uniform_spacing_detected(config, hits),
    }
}

fn burst_detected(config: &HeuristicConfig, hits: &VecDeque<Instant>, now: Instant) -> bool {
    let recent = hits
        .iter()
        .filter(|hit| now.saturating_duration_since(**hit) < config.burst_window)
        .count();
    recent >= config.burst_threshold
}

fn uniform_spacing_detected(config: &HeuristicConfig, hits: &VecDeque<Instant>) -> bool {
    if hits.len() < config.uniform_min_samples {
        return false;
    }

    let gaps: Vec<f64> = hits
        .iter()
        .zip(hits.iter().skip(1))
        .map(|(earlier, later)| later.saturating_duration_since(*earlier).as_secs_f64())
        .collect();
    if gaps.len() < 2 {
        return false;
    }

    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let variance = gaps
        .iter()
        .map(|gap| {
            let diff = gap - mean;
            diff * diff
        })
        .sum::<f64>()
        / gaps.len() as f64;

    variance.is_finite() && variance < config.uniform_variance_threshold
}
