// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Memory guardian.
//!
//! Admission histories and the dispatch backlog both grow with traffic, not
//! with cache size, so they get their own janitor. Each sweep measures how
//! much of the tracked-timestamp budget is spent, derives a pressure level
//! from it, and prunes with a per-client cap that tightens as pressure
//! rises. Queued tasks past their useful age are rejected outright; a
//! caller still waiting hears a definitive refusal instead of silence.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::config::FlowGateConfig;
use crate::metrics;
use crate::pacing::PacingQueue;
use crate::pressure::PressureLevel;

/// Limits the guardian enforces.
#[derive(Debug, Clone)]
pub struct GuardianBudget {
    /// Tracked timestamps across all fingerprints considered "full".
    pub tracked_budget: usize,
    /// Timestamps older than this are dropped regardless of pressure.
    pub history_retention: Duration,
    /// Per-fingerprint timestamp cap at normal pressure.
    pub history_cap: usize,
    /// Queued tasks older than this are discarded.
    pub max_task_age: Duration,
    /// Pressure at which sweep logging escalates to warnings.
    pub pressure_trigger: f64,
}

impl GuardianBudget {
    pub fn from_config(config: &FlowGateConfig) -> Self {
        Self {
            tracked_budget: config.tracked_budget.max(1),
            history_retention: Duration::from_secs(config.history_retention_secs),
            history_cap: config.history_cap.max(1),
            max_task_age: Duration::from_secs(config.max_task_age_secs),
            pressure_trigger: config.pressure_trigger,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepReport {
    pub pressure: f64,
    pub level: PressureLevel,
    /// Per-fingerprint cap actually applied, after pressure tightening.
    pub effective_cap: usize,
    pub timestamps_dropped: usize,
    pub fingerprints_removed: usize,
    pub tasks_discarded: usize,
}

impl SweepReport {
    pub fn trimmed_anything(&self) -> bool {
        self.timestamps_dropped > 0 || self.fingerprints_removed > 0 || self.tasks_discarded > 0
    }
}

pub struct MemoryGuardian<R, E> {
    admission: Arc<AdmissionController>,
    queue: Arc<PacingQueue<R, E>>,
    budget: GuardianBudget,
}

impl<R, E> MemoryGuardian<R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    pub fn new(
        admission: Arc<AdmissionController>,
        queue: Arc<PacingQueue<R, E>>,
        budget: GuardianBudget,
    ) -> Self {
        Self {
            admission,
            queue,
            budget,
        }
    }

    /// Fraction of the tracked-timestamp budget currently in use.
    pub fn pressure(&self) -> f64 {
        self.admission.tracked_hits() as f64 / self.budget.tracked_budget as f64
    }

    /// Run one maintenance pass over admission histories and the backlog.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let pressure = self.pressure();
        let level = PressureLevel::from_pressure(pressure);
        let effective_cap = (self.budget.history_cap / level.cap_divisor()).max(1);

        let prune =
            self.admission
                .prune_histories(now, self.budget.history_retention, effective_cap);
        let tasks_discarded = self.queue.discard_stale(self.budget.max_task_age);

        metrics::record_sweep(prune.timestamps_dropped, prune.removed, tasks_discarded);
        metrics::set_memory_pressure(pressure);
        metrics::set_pressure_level(level as u8);

        let report = SweepReport {
            pressure,
            level,
            effective_cap,
            timestamps_dropped: prune.timestamps_dropped,
            fingerprints_removed: prune.removed,
            tasks_discarded,
        };

        if pressure >= self.budget.pressure_trigger {
            warn!(
                pressure = format_args!("{:.3}", pressure),
                level = %level,
                effective_cap,
                timestamps_dropped = report.timestamps_dropped,
                fingerprints_removed = report.fingerprints_removed,
                tasks_discarded = report.tasks_discarded,
                "sweep under memory pressure"
            );
        } else if report.trimmed_anything() {
            info!(
                pressure = format_args!("{:.3}", pressure),
                timestamps_dropped = report.timestamps_dropped,
                fingerprints_removed = report.fingerprints_removed,
                tasks_discarded = report.tasks_discarded,
                "sweep trimmed tracking state"
            );
        } else {
            debug!(pressure = format_args!("{:.3}", pressure), "sweep found nothing to trim");
        }

        report
    }
}
