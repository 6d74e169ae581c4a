// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for flow-gate.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `flow_gate_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: local, remote
//! - `operation`: get, set, del, flush, probe
//! - `status`: hit, miss, success, error
//! - `verdict`: allowed, rate_limited, invalid_identity
//! - `outcome`: completed, failed, panicked, discarded, cancelled, rejected_closed

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// CACHE TIERS - Per-tier operations and occupancy
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache tier operation and its status
pub fn record_tier_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "flow_gate_tier_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record tier operation latency
pub fn record_tier_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "flow_gate_tier_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a value promoted from the remote tier into the local one
pub fn record_promotion() {
    counter!("flow_gate_promotions_total").increment(1);
}

/// Set current local tier slot count
pub fn set_l1_slots(count: usize) {
    gauge!("flow_gate_l1_slots").set(count as f64);
}

/// Record local tier evictions (capacity overflow or expiry purge)
pub fn record_l1_evictions(reason: &str, count: usize) {
    counter!(
        "flow_gate_l1_evictions_total",
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE TIER - Degradation tracking
// ═══════════════════════════════════════════════════════════════════════════

/// Set whether a remote tier is currently attached (1 = yes, 0 = no)
pub fn set_remote_attached(attached: bool) {
    gauge!("flow_gate_remote_attached").set(if attached { 1.0 } else { 0.0 });
}

/// Record a remote operation timing out
pub fn record_remote_timeout(operation: &str) {
    counter!(
        "flow_gate_remote_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a remote operation failing
pub fn record_remote_error(operation: &str) {
    counter!(
        "flow_gate_remote_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ADMISSION - Verdicts and abuse signals
// ═══════════════════════════════════════════════════════════════════════════

/// Record an admission verdict
pub fn record_admission(verdict: &str) {
    counter!(
        "flow_gate_admission_total",
        "verdict" => verdict.to_string()
    )
    .increment(1);
}

/// Record an advisory abuse signal firing
pub fn record_abuse_signal(kind: &str) {
    counter!(
        "flow_gate_abuse_signals_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Set the number of client fingerprints currently tracked
pub fn set_tracked_fingerprints(count: usize) {
    gauge!("flow_gate_tracked_fingerprints").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// PACING QUEUE - Depth, waits, outcomes
// ═══════════════════════════════════════════════════════════════════════════

/// Set current backlog depth
pub fn set_queue_depth(count: usize) {
    gauge!("flow_gate_queue_depth").set(count as f64);
}

/// Record how long a task waited in the backlog before dispatch
pub fn record_queue_wait(duration: Duration) {
    histogram!("flow_gate_queue_wait_seconds").record(duration.as_secs_f64());
}

/// Record the pacing sleep inserted before a dispatch
pub fn record_pacing_delay(duration: Duration) {
    histogram!("flow_gate_pacing_delay_seconds").record(duration.as_secs_f64());
}

/// Record how a queued task ended
pub fn record_task_outcome(outcome: &str) {
    counter!(
        "flow_gate_tasks_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// MEMORY GUARDIAN - Sweeps and pressure
// ═══════════════════════════════════════════════════════════════════════════

/// Record one guardian sweep's trims
pub fn record_sweep(timestamps_dropped: usize, fingerprints_removed: usize, tasks_discarded: usize) {
    counter!("flow_gate_sweeps_total").increment(1);
    counter!("flow_gate_sweep_timestamps_dropped_total").increment(timestamps_dropped as u64);
    counter!("flow_gate_sweep_fingerprints_removed_total").increment(fingerprints_removed as u64);
    counter!("flow_gate_sweep_tasks_discarded_total").increment(tasks_discarded as u64);
}

/// Set tracking-table pressure ratio (0.0 - 1.0+)
pub fn set_memory_pressure(pressure: f64) {
    gauge!("flow_gate_memory_pressure").set(pressure);
}

/// Set pressure level (0 = Normal, 1 = Elevated, 2 = Strained, 3 = Critical)
pub fn set_pressure_level(level: u8) {
    gauge!("flow_gate_pressure_level").set(level as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE - Startup timing and state transitions
// ═══════════════════════════════════════════════════════════════════════════

/// Record a startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "flow_gate_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record total startup time
pub fn record_startup_total(duration: Duration) {
    histogram!("flow_gate_startup_total_seconds").record(duration.as_secs_f64());
}

/// Record an engine state transition
pub fn set_engine_state(state: &str) {
    counter!(
        "flow_gate_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records tier latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_tier_latency(self.tier, self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($tier:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($tier, $op)
    };
}
