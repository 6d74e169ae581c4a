//! Configuration for the flow gate.
//!
//! # Example
//!
//! ```
//! use flow_gate::FlowGateConfig;
//!
//! // Minimal config (uses defaults)
//! let config = FlowGateConfig::default();
//! assert_eq!(config.rate_limit, 3);
//! assert_eq!(config.pacing_floor_ms, 2000);
//!
//! // Full config
//! let config = FlowGateConfig {
//!     remote_url: Some("redis://localhost:6379".into()),
//!     key_prefix: "myapp".into(),
//!     default_ttl_secs: 600,
//!     rate_limit: 5,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for the flow gate.
///
/// All fields have working defaults. Without `remote_url` the cache runs
/// local-only, which is a supported mode rather than an error.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowGateConfig {
    /// Remote tier connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Namespace prefix for remote tier keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL applied when a write requests none (or a non-positive one)
    #[serde(default = "default_default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Hard ceiling on any requested TTL (default: 30 days)
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,

    /// Local tier slot bound; overflow evicts the soonest-expiring slot
    #[serde(default = "default_l1_max_entries")]
    pub l1_max_entries: usize,

    /// Per-operation remote tier timeout
    #[serde(default = "default_remote_op_timeout_ms")]
    pub remote_op_timeout_ms: u64,

    /// Minimum spacing between remote reconnect attempts
    #[serde(default = "default_remote_retry_cooldown_secs")]
    pub remote_retry_cooldown_secs: u64,

    /// Requests allowed per window per client fingerprint
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,

    /// Sliding rate window span in seconds
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,

    /// Burst heuristic sub-window in seconds
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: u64,

    /// Hits inside the sub-window that flag a burst
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,

    /// Timestamps needed before the spacing heuristic applies
    #[serde(default = "default_uniform_min_samples")]
    pub uniform_min_samples: usize,

    /// Inter-arrival variance (s^2) below which spacing looks scripted
    #[serde(default = "default_uniform_variance_threshold")]
    pub uniform_variance_threshold: f64,

    /// Minimum spacing between downstream dispatches
    #[serde(default = "default_pacing_floor_ms")]
    pub pacing_floor_ms: u64,

    /// Run the memory guardian sweep ticker
    #[serde(default = "default_guardian_enabled")]
    pub guardian_enabled: bool,

    /// Guardian sweep period in seconds
    #[serde(default = "default_guardian_interval_secs")]
    pub guardian_interval_secs: u64,

    /// Sweep drops fingerprint timestamps older than this
    #[serde(default = "default_history_retention_secs")]
    pub history_retention_secs: u64,

    /// Per-fingerprint timestamp cap (tightened under pressure)
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Sweep discards queued tasks older than this
    #[serde(default = "default_max_task_age_secs")]
    pub max_task_age_secs: u64,

    /// Total tracked-timestamp budget used to compute pressure
    #[serde(default = "default_tracked_budget")]
    pub tracked_budget: usize,

    /// Pressure ratio at which sweep logs escalate to warnings
    #[serde(default = "default_pressure_trigger")]
    pub pressure_trigger: f64,
}

fn default_key_prefix() -> String { "fg".to_string() }
fn default_default_ttl_secs() -> u64 { 3600 } // 1 hour
fn default_max_ttl_secs() -> u64 { 2_592_000 } // 30 days
fn default_l1_max_entries() -> usize { 100_000 }
fn default_remote_op_timeout_ms() -> u64 { 1000 }
fn default_remote_retry_cooldown_secs() -> u64 { 30 }
fn default_rate_limit() -> usize { 3 }
fn default_rate_window_secs() -> u64 { 60 }
fn default_burst_window_secs() -> u64 { 10 }
fn default_burst_threshold() -> usize { 3 }
fn default_uniform_min_samples() -> usize { 5 }
fn default_uniform_variance_threshold() -> f64 { 0.01 }
fn default_pacing_floor_ms() -> u64 { 2000 }
fn default_guardian_enabled() -> bool { true }
fn default_guardian_interval_secs() -> u64 { 60 }
fn default_history_retention_secs() -> u64 { 300 } // 5 minutes
fn default_history_cap() -> usize { 50 }
fn default_max_task_age_secs() -> u64 { 300 } // 5 minutes
fn default_tracked_budget() -> usize { 10_000 }
fn default_pressure_trigger() -> f64 { 0.80 }

impl Default for FlowGateConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_default_ttl_secs(),
            max_ttl_secs: default_max_ttl_secs(),
            l1_max_entries: default_l1_max_entries(),
            remote_op_timeout_ms: default_remote_op_timeout_ms(),
            remote_retry_cooldown_secs: default_remote_retry_cooldown_secs(),
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window_secs(),
            burst_window_secs: default_burst_window_secs(),
            burst_threshold: default_burst_threshold(),
            uniform_min_samples: default_uniform_min_samples(),
            uniform_variance_threshold: default_uniform_variance_threshold(),
            pacing_floor_ms: default_pacing_floor_ms(),
            guardian_enabled: default_guardian_enabled(),
            guardian_interval_secs: default_guardian_interval_secs(),
            history_retention_secs: default_history_retention_secs(),
            history_cap: default_history_cap(),
            max_task_age_secs: default_max_task_age_secs(),
            tracked_budget: default_tracked_budget(),
            pressure_trigger: default_pressure_trigger(),
        }
    }
}
