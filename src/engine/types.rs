//! Public types for the gate engine.

use crate::pressure::PressureLevel;

/// Gate lifecycle state.
///
/// The gate progresses through states during startup and shutdown. Use
/// [`super::FlowGate::state()`] to check the current state or
/// [`super::FlowGate::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Just created, not yet started
    Created,
    /// Attaching the remote tier
    Connecting,
    /// Serving requests
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Shutdown complete
    Stopped,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot of gate health.
///
/// Collected by [`super::FlowGate::health_check()`]; cached fields cost
/// nothing, the remote probe is live I/O.
#[derive(Debug, Clone)]
pub struct GateHealth {
    /// Current lifecycle state
    pub state: GateState,
    /// True when the gate is serving requests
    pub ready: bool,
    /// Tracked-timestamp budget in use (0.0 - 1.0+)
    pub memory_pressure: f64,
    /// Pressure level derived from `memory_pressure`
    pub pressure_level: PressureLevel,
    /// Entries resident in the memory tier
    pub local_entries: usize,
    /// Tasks waiting in the dispatch backlog
    pub queue_depth: usize,
    /// Distinct client fingerprints with admission history
    pub tracked_fingerprints: usize,
    /// Whether a remote tier is currently attached
    pub remote_attached: bool,
    /// Remote probe result; `None` when no remote is configured
    pub remote_connected: Option<bool>,
    /// Remote probe round-trip, when the probe succeeded
    pub remote_latency_ms: Option<u64>,
    /// Overall verdict, suitable for a `/ready` endpoint
    pub healthy: bool,
}

impl GateHealth {
    /// Serving requests from the memory tier while the configured remote
    /// is unreachable.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.ready && self.remote_connected == Some(false)
    }
}
