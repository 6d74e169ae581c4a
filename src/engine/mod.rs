// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Gate engine.
//!
//! The [`FlowGate`] is the main orchestrator that ties together all
//! components:
//! - Two-tier cache store (memory + optional Redis)
//! - Sliding-window admission control with abuse heuristics
//! - Paced single-flight dispatch queue
//! - Memory guardian sweeping tracking state
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use flow_gate::{FlowGate, FlowGateConfig, GateState};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = FlowGateConfig::default();
//! let gate: FlowGate<String, std::io::Error> = FlowGate::new(config);
//!
//! assert_eq!(gate.state(), GateState::Created);
//!
//! // gate.start().await;
//! // assert!(gate.is_ready());
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{GateHealth, GateState};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::admission::{AdmissionController, HeuristicConfig};
use crate::config::FlowGateConfig;
use crate::guardian::{GuardianBudget, MemoryGuardian, SweepReport};
use crate::pacing::PacingQueue;
use crate::pressure::PressureLevel;
use crate::store::TieredStore;
use crate::ttl::TtlPolicy;

/// Main gate orchestrator.
///
/// Generic over the cached response type `R` and the backend error type
/// `E`; backend errors surface to callers intact.
///
/// # Thread Safety
///
/// The gate is `Send + Sync` and designed for concurrent access. All
/// methods take `&self`; internal state uses concurrent data structures.
pub struct FlowGate<R, E> {
    /// Configuration (read-only after construction)
    pub(super) config: FlowGateConfig,

    /// Two-tier cache store
    pub(super) store: Arc<TieredStore<R>>,

    /// Admission controller
    pub(super) admission: Arc<AdmissionController>,

    /// Paced dispatch queue
    pub(super) queue: Arc<PacingQueue<R, E>>,

    /// Memory guardian
    pub(super) guardian: Arc<MemoryGuardian<R, E>>,

    /// Gate state (broadcast to watchers)
    pub(super) state: watch::Sender<GateState>,

    /// Gate state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<GateState>,

    /// Shutdown signal for background tickers
    pub(super) shutdown_tx: watch::Sender<bool>,

    /// Background ticker handles, joined on shutdown
    pub(super) tickers: Mutex<Vec<JoinHandle<()>>>,

    /// Pacing worker handle, joined on shutdown
    pub(super) worker: Mutex<Option<JoinHandle<()>>>,
}

impl<R, E> FlowGate<R, E>
where
    R: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Create a new gate.
    ///
    /// The gate starts in `Created` state with no remote tier and no
    /// worker running. Call [`start()`](Self::start) to bring it up.
    pub fn new(config: FlowGateConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(GateState::Created);
        let (shutdown_tx, _) = watch::channel(false);

        let ttl = TtlPolicy::new(config.default_ttl_secs, config.max_ttl_secs);
        let store = Arc::new(TieredStore::new(
            config.l1_max_entries,
            ttl,
            Duration::from_millis(config.remote_op_timeout_ms),
        ));

        let heuristics = HeuristicConfig {
            burst_window: Duration::from_secs(config.burst_window_secs),
            burst_threshold: config.burst_threshold,
            uniform_min_samples: config.uniform_min_samples,
            uniform_variance_threshold: config.uniform_variance_threshold,
        };
        let admission = Arc::new(AdmissionController::new(
            config.rate_limit,
            Duration::from_secs(config.rate_window_secs),
            config.history_cap,
            heuristics,
        ));

        let queue = Arc::new(PacingQueue::new(Duration::from_millis(config.pacing_floor_ms)));
        let guardian = Arc::new(MemoryGuardian::new(
            admission.clone(),
            queue.clone(),
            GuardianBudget::from_config(&config),
        ));

        Self {
            config,
            store,
            admission,
            queue,
            guardian,
            state: state_tx,
            state_rx,
            shutdown_tx,
            tickers: Mutex::new(Vec::new()),
            worker: Mutex::new(None),
        }
    }

    /// Get current gate state.
    #[must_use]
    pub fn state(&self) -> GateState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<GateState> {
        self.state_rx.clone()
    }

    /// Check if the gate is serving requests.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), GateState::Running)
    }

    /// Get current memory pressure (0.0 - 1.0+).
    #[must_use]
    pub fn memory_pressure(&self) -> f64 {
        self.guardian.pressure()
    }

    /// Get current pressure level.
    #[must_use]
    pub fn pressure(&self) -> PressureLevel {
        PressureLevel::from_pressure(self.memory_pressure())
    }

    /// The configuration this gate was built with.
    #[must_use]
    pub fn config(&self) -> &FlowGateConfig {
        &self.config
    }

    /// Direct handle to the tiered store, for callers that bypass the gate.
    #[must_use]
    pub fn store(&self) -> &Arc<TieredStore<R>> {
        &self.store
    }

    /// Direct handle to the admission controller.
    #[must_use]
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Direct handle to the pacing queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<PacingQueue<R, E>> {
        &self.queue
    }

    /// Run one guardian sweep immediately, outside the ticker cadence.
    pub fn sweep(&self) -> SweepReport {
        self.guardian.sweep()
    }

    /// Perform a comprehensive health check.
    ///
    /// Collects cached state plus a live remote probe into a
    /// [`GateHealth`] suitable for `/ready` and `/health` endpoints.
    ///
    /// # Performance
    ///
    /// - **Cached fields**: Instant (no I/O)
    /// - **Live probe**: Remote PING, bounded by the remote op timeout
    pub async fn health_check(&self) -> GateHealth {
        // Cached state (no I/O)
        let state = self.state();
        let ready = matches!(state, GateState::Running);
        let memory_pressure = self.memory_pressure();
        let pressure_level = PressureLevel::from_pressure(memory_pressure);
        let local_entries = self.store.local_len();
        let queue_depth = self.queue.depth();
        let tracked_fingerprints = self.admission.tracked_fingerprints();
        let remote_attached = self.store.remote_attached();

        // Live probe
        let (remote_connected, remote_latency_ms) = self.probe_remote().await;

        // Healthy if serving and the remote, when configured, answers.
        let healthy = ready && remote_connected != Some(false);

        GateHealth {
            state,
            ready,
            memory_pressure,
            pressure_level,
            local_entries,
            queue_depth,
            tracked_fingerprints,
            remote_attached,
            remote_connected,
            remote_latency_ms,
            healthy,
        }
    }

    /// Probe remote tier connectivity.
    async fn probe_remote(&self) -> (Option<bool>, Option<u64>) {
        if self.config.remote_url.is_none() {
            return (None, None); // Remote not configured
        }
        let Some(remote) = self.store.remote_handle() else {
            return (Some(false), None); // Configured but never attached
        };

        let start = Instant::now();
        let budget = Duration::from_millis(self.config.remote_op_timeout_ms);
        match tokio::time::timeout(budget, remote.probe()).await {
            Ok(Ok(())) => (Some(true), Some(start.elapsed().as_millis() as u64)),
            _ => (Some(false), None),
        }
    }
}

#[cfg(test)]
pub(crate) fn create_test_gate() -> FlowGate<String, std::io::Error> {
    let config = FlowGateConfig {
        remote_url: None,
        pacing_floor_ms: 50,
        rate_limit: 3,
        rate_window_secs: 60,
        guardian_interval_secs: 1,
        ..FlowGateConfig::default()
    };
    FlowGate::new(config)
}
