//! # Flow Gate
//!
//! A tiered response cache and adaptive admission gate for scarce,
//! rate-limited backends.
//!
//! ## Architecture
//!
//! Requests pass through three layers, each designed to keep load away
//! from the backend behind it:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Admission Layer                        │
//! │  • Client fingerprints (first-hop address + agent digest)  │
//! │  • Sliding-window rate limiting, fail-closed               │
//! │  • Advisory burst / uniform-spacing heuristics             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Tiered Response Cache                     │
//! │  • L1: in-memory DashMap with lazy expiry                  │
//! │  • L2: Redis with versioned envelopes (optional)           │
//! │  • Transparent degradation when Redis is unreachable       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (miss → paced backend call)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Pacing Dispatch Queue                     │
//! │  • Strict FIFO, one task in flight                         │
//! │  • Minimum spacing between consecutive dispatches          │
//! │  • Stale backlog entries discarded by the guardian         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flow_gate::{FlowGate, FlowGateConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = FlowGateConfig {
//!         remote_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!
//!     let gate: FlowGate<String, std::io::Error> = FlowGate::new(config);
//!     gate.start().await;
//!
//!     // Admission-check the client before doing any work
//!     if let Err(denied) = gate.admit(Some("203.0.113.7"), Some("Mozilla/5.0 (X11; Linux x86_64)")) {
//!         println!("rejected with HTTP {}", denied.http_status());
//!         return;
//!     }
//!
//!     // Serve from cache when possible
//!     if let Some(answer) = gate.get("prompt-digest").await {
//!         println!("cached: {}", answer);
//!     } else {
//!         // Miss: pace the backend call, then cache what it returns
//!         let handle = gate.dispatch(async {
//!             // call the scarce backend here
//!             Ok("fresh answer".to_string())
//!         });
//!         if let Ok(answer) = handle.outcome().await {
//!             gate.set("prompt-digest", answer, None);
//!         }
//!     }
//!
//!     gate.shutdown().await;
//! }
//! ```
//!
//! ## Features
//!
//! - **Tiered Caching**: memory first, Redis behind it, promotion on remote hits
//! - **Lifetime Clamping**: requested TTLs clamped to a hard ceiling, never infinite
//! - **Admission Control**: fail-closed fingerprinting with per-client sliding windows
//! - **Abuse Heuristics**: burst and machine-regular spacing detection, advisory only
//! - **Paced Dispatch**: strict FIFO, single flight, enforced floor between dispatches
//! - **Memory Guardian**: pressure-aware pruning of admission state and the backlog
//! - **Retry Logic**: configurable retry policies for transient failures
//!
//! ## Configuration
//!
//! See [`FlowGateConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`engine`]: The main [`FlowGate`] orchestrating all components
//! - [`store`]: Tiered cache store (memory + Redis)
//! - [`admission`]: Fingerprinting, rate windows, abuse heuristics
//! - [`pacing`]: Paced single-flight dispatch queue
//! - [`guardian`]: Memory guardian sweeps
//! - [`pressure`]: Pressure levels driving guardian behavior
//! - [`resilience`]: Retry logic
//! - [`ttl`]: Lifetime clamping policy

pub mod config;
pub mod ttl;
pub mod store;
pub mod admission;
pub mod pacing;
pub mod pressure;
pub mod guardian;
pub mod resilience;
pub mod engine;
pub mod metrics;

pub use config::FlowGateConfig;
pub use engine::{FlowGate, GateHealth, GateState};
pub use pressure::PressureLevel;
pub use admission::{AbuseSignals, AdmissionController, AdmissionError, ClientFingerprint, HeuristicConfig};
pub use store::{MemoryTier, RedisTier, RemoteTier, StoreError, TieredStore};
pub use pacing::{PacingQueue, QueueError, TaskHandle};
pub use guardian::{GuardianBudget, MemoryGuardian, SweepReport};
pub use resilience::retry::RetryConfig;
pub use ttl::TtlPolicy;
pub use metrics::LatencyTimer;
