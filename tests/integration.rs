//! Integration Tests for Flow Gate
//!
//! This module contains all integration tests that require a real Redis backend.
//! Tests use testcontainers for portability - no external docker-compose required.
//! Tests that exercise only the local tier and the dispatch queue run without
//! Docker and are not ignored.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --include-ignored
//!
//! # Run only happy-path tests
//! cargo test --test integration happy -- --include-ignored
//!
//! # Run only failure scenario tests
//! cargo test --test integration failure -- --include-ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: lifecycle, tier promotion, pacing, admission
//! - `failure_*` - Failure scenarios: Redis death, degraded reads, shutdown

use std::time::{Duration, Instant};

use flow_gate::{FlowGate, FlowGateConfig, GateState, QueueError};

use testcontainers::{clients::Cli, Container, GenericImage, core::WaitFor};

// =============================================================================
// Container Helpers
// =============================================================================

/// Install a fmt subscriber so failing runs can be replayed with
/// `RUST_LOG=flow_gate=debug`. Safe to call from every test; only the first
/// call wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn remote_config(redis_port: u16) -> FlowGateConfig {
    FlowGateConfig {
        remote_url: Some(format!("redis://127.0.0.1:{}", redis_port)),
        remote_op_timeout_ms: 1000,
        pacing_floor_ms: 50,
        ..Default::default()
    }
}

fn local_config() -> FlowGateConfig {
    FlowGateConfig {
        remote_url: None,
        pacing_floor_ms: 100,
        ..Default::default()
    }
}

fn test_gate(config: FlowGateConfig) -> FlowGate<String, std::io::Error> {
    init_tracing();
    FlowGate::new(config)
}

/// Poll a gate until the key shows up, giving the detached remote write from
/// another instance time to land.
async fn wait_for_key(gate: &FlowGate<String, std::io::Error>, key: &str) -> Option<String> {
    for _ in 0..40 {
        if let Some(value) = gate.get(key).await {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

// =============================================================================
// Happy Path Tests - Normal Operation
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_gate_lifecycle_with_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let gate = test_gate(remote_config(redis.get_host_port_ipv4(6379)));

    assert_eq!(gate.state(), GateState::Created);
    gate.start().await;
    assert!(gate.is_ready());

    let health = gate.health_check().await;
    assert!(health.healthy);
    assert_eq!(health.remote_connected, Some(true));
    assert!(health.remote_latency_ms.is_some());

    gate.set("greeting", "hello".to_string(), Some(600));
    assert_eq!(gate.get("greeting").await, Some("hello".to_string()));

    gate.shutdown().await;
    assert_eq!(gate.state(), GateState::Stopped);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_cross_instance_promotion() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let writer = test_gate(remote_config(port));
    let reader = test_gate(remote_config(port));
    writer.start().await;
    reader.start().await;

    writer.set("shared", "written elsewhere".to_string(), Some(600));

    // The reader has no local copy; the hit must come through the remote
    // tier and be promoted.
    let value = wait_for_key(&reader, "shared").await;
    assert_eq!(value, Some("written elsewhere".to_string()));

    writer.shutdown().await;
    reader.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_flush_clears_remote_tier() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let writer = test_gate(remote_config(port));
    writer.start().await;

    writer.set("a", "1".to_string(), Some(600));
    writer.set("b", "2".to_string(), Some(600));

    // Make sure the detached writes landed before flushing.
    let reader = test_gate(remote_config(port));
    reader.start().await;
    assert!(wait_for_key(&reader, "a").await.is_some());

    let removed = writer.flush().await;
    assert!(removed >= 2, "expected both tiers to report removals, got {}", removed);

    // A fresh instance sees nothing.
    let fresh = test_gate(remote_config(port));
    fresh.start().await;
    assert_eq!(fresh.get("a").await, None);
    assert_eq!(fresh.get("b").await, None);

    writer.shutdown().await;
    reader.shutdown().await;
    fresh.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_lifetime_enforced_across_instances() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let port = redis.get_host_port_ipv4(6379);

    let writer = test_gate(remote_config(port));
    writer.start().await;
    writer.set("short-lived", "x".to_string(), Some(2));

    let early = test_gate(remote_config(port));
    early.start().await;
    assert!(wait_for_key(&early, "short-lived").await.is_some());

    tokio::time::sleep(Duration::from_millis(2500)).await;

    // Past its lifetime the entry is gone for a fresh instance, whichever
    // side expires it first.
    let late = test_gate(remote_config(port));
    late.start().await;
    assert_eq!(late.get("short-lived").await, None);

    writer.shutdown().await;
    early.shutdown().await;
    late.shutdown().await;
}

#[tokio::test]
async fn happy_pacing_preserves_order_under_load() {
    let gate = test_gate(local_config());
    gate.start().await;

    let stamps = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for n in 0..4u32 {
        let stamps = stamps.clone();
        handles.push(gate.dispatch(async move {
            stamps.lock().push((n, Instant::now()));
            Ok(n.to_string())
        }));
    }
    for (n, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.outcome().await.unwrap(), n.to_string());
    }

    let stamps = stamps.lock();
    let order: Vec<u32> = stamps.iter().map(|(n, _)| *n).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
    for pair in stamps.windows(2) {
        let gap = pair[1].1.duration_since(pair[0].1);
        assert!(
            gap >= Duration::from_millis(100),
            "dispatch gap {:?} under the floor",
            gap
        );
    }

    gate.shutdown().await;
}

#[tokio::test]
async fn happy_rate_limit_recovers_after_window() {
    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";
    let gate = test_gate(FlowGateConfig {
        rate_limit: 2,
        rate_window_secs: 2,
        ..local_config()
    });
    gate.start().await;

    assert!(gate.admit(Some("203.0.113.7"), Some(UA)).is_ok());
    assert!(gate.admit(Some("203.0.113.7"), Some(UA)).is_ok());

    let denied = gate.admit(Some("203.0.113.7"), Some(UA)).unwrap_err();
    let retry_after = denied.retry_after().expect("rate limit carries retry-after");
    assert!(retry_after <= Duration::from_secs(2));

    // After the full window every hit has aged out, including the denied
    // attempt that was recorded above.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(gate.admit(Some("203.0.113.7"), Some(UA)).is_ok());

    gate.shutdown().await;
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
async fn failure_unreachable_remote_degrades_to_local() {
    // Nothing listens on port 1; connect attempts fail fast and startup
    // proceeds without the remote tier.
    let gate = test_gate(FlowGateConfig {
        remote_url: Some("redis://127.0.0.1:1".to_string()),
        ..local_config()
    });
    gate.start().await;
    assert!(gate.is_ready());

    let health = gate.health_check().await;
    assert!(health.ready);
    assert!(!health.healthy);
    assert_eq!(health.remote_connected, Some(false));
    assert!(health.is_degraded());

    // The cache keeps working from memory alone.
    gate.set("local", "survives".to_string(), None);
    assert_eq!(gate.get("local").await, Some("survives".to_string()));
    assert_eq!(gate.get("absent").await, None);

    gate.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_redis_death_degrades_reads() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let gate = test_gate(remote_config(redis.get_host_port_ipv4(6379)));
    gate.start().await;

    gate.set("kept", "in memory".to_string(), Some(600));

    // Kill Redis out from under the gate.
    drop(redis);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Local hits are unaffected.
    assert_eq!(gate.get("kept").await, Some("in memory".to_string()));

    // Remote misses degrade to a plain miss, bounded by the op timeout
    // rather than hanging on the dead connection.
    let started = Instant::now();
    assert_eq!(gate.get("never-cached").await, None);
    assert!(started.elapsed() < Duration::from_secs(3));

    let health = gate.health_check().await;
    assert!(health.is_degraded());
    assert!(!health.healthy);

    gate.shutdown().await;
}

#[tokio::test]
async fn failure_shutdown_definitively_rejects_backlog() {
    let gate = test_gate(FlowGateConfig {
        pacing_floor_ms: 200,
        ..local_config()
    });
    gate.start().await;

    let blocker = gate.dispatch(async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok("slow".to_string())
    });
    // Let the worker pick up the blocker so the next task sits in the backlog.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let queued = gate.dispatch(async { Ok("stuck behind".to_string()) });

    gate.shutdown().await;
    assert_eq!(gate.state(), GateState::Stopped);

    // The in-flight task was allowed to finish; the backlog was not.
    assert_eq!(blocker.outcome().await.unwrap(), "slow");
    assert!(matches!(queued.outcome().await, Err(QueueError::Closed)));

    let late = gate.dispatch(async { Ok("too late".to_string()) });
    assert!(matches!(late.outcome().await, Err(QueueError::Closed)));
}
