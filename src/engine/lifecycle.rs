//! Gate lifecycle management: start, background tickers, shutdown.
//!
//! This module contains the startup sequence, the maintenance tickers, and
//! the graceful shutdown logic.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{FlowGate, GateState};
use crate::store::RedisTier;

/// Cadence of the expired-entry purge and reconnect checks.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on one remote connect attempt, including its internal
/// retries. Keeps both startup and the reconnect ticker from hanging on a
/// blackholed endpoint.
const REMOTE_CONNECT_BUDGET: Duration = Duration::from_secs(10);

impl<R, E> FlowGate<R, E>
where
    R: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Start the gate.
    ///
    /// Startup flow:
    /// 1. Attach the remote tier, when configured
    /// 2. Spawn the pacing worker
    /// 3. Spawn background tickers (housekeeping, guardian sweeps)
    ///
    /// Startup cannot fail: an unreachable remote leaves the gate serving
    /// from memory, with the housekeeping ticker retrying the attach on a
    /// cooldown until the endpoint recovers.
    #[tracing::instrument(skip(self), fields(has_remote))]
    pub async fn start(&self) {
        if self.state() != GateState::Created {
            warn!(state = %self.state(), "start() ignored, gate already started");
            return;
        }

        let startup_start = std::time::Instant::now();
        info!("Starting flow gate...");
        let _ = self.state.send(GateState::Connecting);
        crate::metrics::set_engine_state(&GateState::Connecting.to_string());

        // ========== PHASE 1: Attach remote tier (optional) ==========
        let phase_start = std::time::Instant::now();
        if let Some(ref url) = self.config.remote_url {
            info!(url = %url, "Connecting remote tier...");
            match tokio::time::timeout(
                REMOTE_CONNECT_BUDGET,
                RedisTier::connect(url, &self.config.key_prefix),
            )
            .await
            {
                Ok(Ok(tier)) => {
                    self.store.attach_remote(Arc::new(tier));
                    tracing::Span::current().record("has_remote", true);
                    crate::metrics::record_startup_phase("remote_attach", phase_start.elapsed());
                    info!("Remote tier attached");
                }
                Ok(Err(e)) => {
                    tracing::Span::current().record("has_remote", false);
                    crate::metrics::record_remote_error("connect");
                    warn!(error = %e, "Remote tier unreachable - serving from memory until it recovers");
                }
                Err(_) => {
                    tracing::Span::current().record("has_remote", false);
                    crate::metrics::record_remote_timeout("connect");
                    warn!(
                        budget_secs = REMOTE_CONNECT_BUDGET.as_secs(),
                        "Remote tier connect timed out - serving from memory until it recovers"
                    );
                }
            }
        } else {
            tracing::Span::current().record("has_remote", false);
            debug!("No remote URL configured - memory tier only");
        }

        // ========== PHASE 2: Start pacing worker ==========
        let phase_start = std::time::Instant::now();
        if let Some(handle) = self.queue.start() {
            *self.worker.lock() = Some(handle);
        }
        crate::metrics::record_startup_phase("pacing_worker", phase_start.elapsed());

        // ========== PHASE 3: Spawn background tickers ==========
        let phase_start = std::time::Instant::now();
        self.spawn_tickers();
        crate::metrics::record_startup_phase("tickers", phase_start.elapsed());

        let _ = self.state.send(GateState::Running);
        crate::metrics::set_engine_state(&GateState::Running.to_string());
        crate::metrics::record_startup_total(startup_start.elapsed());
        info!(
            elapsed_ms = startup_start.elapsed().as_millis() as u64,
            "Flow gate running"
        );
    }

    /// Spawn the maintenance tickers.
    ///
    /// Housekeeping purges expired memory-tier entries, refreshes cache
    /// gauges, and re-attaches the remote tier after an outage. The
    /// guardian ticker sweeps admission histories and the backlog.
    fn spawn_tickers(&self) {
        let mut handles = self.tickers.lock();

        {
            let store = self.store.clone();
            let remote_url = self.config.remote_url.clone();
            let key_prefix = self.config.key_prefix.clone();
            let cooldown = Duration::from_secs(self.config.remote_retry_cooldown_secs.max(1));
            let mut shutdown = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
                // The start() attach counts as the first attempt, so the
                // cooldown runs from spawn.
                let mut last_attempt = Instant::now();

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let purged = store.purge_expired();
                            if purged > 0 {
                                debug!(purged, "purged expired memory-tier entries");
                            }
                            crate::metrics::set_l1_slots(store.local_len());

                            let Some(ref url) = remote_url else { continue };
                            if store.remote_attached() || last_attempt.elapsed() < cooldown {
                                continue;
                            }

                            last_attempt = Instant::now();
                            info!(url = %url, "Attempting remote tier reconnect...");
                            tokio::select! {
                                attach = tokio::time::timeout(
                                    REMOTE_CONNECT_BUDGET,
                                    RedisTier::connect(url, &key_prefix),
                                ) => match attach {
                                    Ok(Ok(tier)) => {
                                        store.attach_remote(Arc::new(tier));
                                        info!("Remote tier attached after outage");
                                    }
                                    Ok(Err(e)) => {
                                        crate::metrics::record_remote_error("connect");
                                        warn!(
                                            error = %e,
                                            retry_in_secs = cooldown.as_secs(),
                                            "Remote tier still unreachable"
                                        );
                                    }
                                    Err(_) => {
                                        crate::metrics::record_remote_timeout("connect");
                                        warn!(
                                            retry_in_secs = cooldown.as_secs(),
                                            "Remote tier connect timed out"
                                        );
                                    }
                                },
                                _ = shutdown.changed() => break,
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("housekeeping ticker stopped");
            }));
        }

        if self.config.guardian_enabled {
            let guardian = self.guardian.clone();
            let period = Duration::from_secs(self.config.guardian_interval_secs.max(1));
            let mut shutdown = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // Skip the immediate first tick; a just-started gate has
                // nothing to sweep.
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            guardian.sweep();
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("guardian ticker stopped");
            }));
        }
    }

    /// Initiate graceful shutdown.
    ///
    /// Tickers stop first, then the queue closes: every queued task is
    /// rejected, the in-flight one (if any) runs to completion, and the
    /// worker exits. Pending callers all hear a definitive answer.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = std::time::Instant::now();
        info!("Initiating flow gate shutdown...");
        let _ = self.state.send(GateState::ShuttingDown);
        crate::metrics::set_engine_state(&GateState::ShuttingDown.to_string());

        let _ = self.shutdown_tx.send(true);
        let tickers = {
            let mut guard = self.tickers.lock();
            guard.drain(..).collect::<Vec<_>>()
        };
        for handle in tickers {
            let _ = handle.await;
        }

        self.queue.shutdown();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        let _ = self.state.send(GateState::Stopped);
        crate::metrics::set_engine_state(&GateState::Stopped.to_string());
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!("Flow gate shutdown complete");
    }
}
