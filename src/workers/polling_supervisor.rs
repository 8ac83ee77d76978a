//! Supervised reconciliation loops for transactions the gateway left open.
//!
//! One loop runs per transaction reference. A loop is only started after the
//! transaction's persisted polling flag has been claimed, and every spawned
//! loop stays in the registry until it is joined, so its outcome can always
//! be observed.
//!
//! The persisted claim is a soft guard: two processes racing on the same
//! reference are serialized by the conditional update, but a loop that dies
//! without clearing the flag blocks new loops for that reference until the
//! flag is cleared.

use crate::database::repository::GatewayTransactionStore;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::PaymentStatus;
use crate::workers::rate_limiter::{GatewayRateLimiter, DEFAULT_GATEWAY_CONCURRENCY};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Time between inquiries.
    pub interval: Duration,
    /// Lifetime of a loop, measured from its start.
    pub deadline: Duration,
    /// Capacity of the shared gateway rate limiter.
    pub max_concurrent: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(120),
            max_concurrent: DEFAULT_GATEWAY_CONCURRENCY,
        }
    }
}

impl PollingConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.deadline = Duration::from_secs(
            std::env::var("POLL_DEADLINE_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.deadline.as_secs()),
        );
        cfg.max_concurrent = std::env::var("GATEWAY_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(cfg.max_concurrent);
        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("POLL_INTERVAL_SECONDS must be greater than 0".to_string());
        }
        if self.deadline < self.interval {
            return Err("POLL_DEADLINE_SECONDS must be >= POLL_INTERVAL_SECONDS".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("GATEWAY_MAX_CONCURRENT must be greater than 0".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// How a reconciliation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The gateway reported a terminal status and it was persisted.
    Settled(PaymentStatus),
    /// The deadline passed first; the transaction was marked failed.
    TimedOut,
    /// The supervisor shut down; the stored status was left untouched.
    Cancelled,
}

pub struct PollingSupervisor {
    store: Arc<dyn GatewayTransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    limiter: GatewayRateLimiter,
    config: PollingConfig,
    loops: Mutex<HashMap<String, JoinHandle<PollOutcome>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl PollingSupervisor {
    pub fn new(
        store: Arc<dyn GatewayTransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        limiter: GatewayRateLimiter,
        config: PollingConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            gateway,
            limiter,
            config,
            loops: Mutex::new(HashMap::new()),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn limiter(&self) -> &GatewayRateLimiter {
        &self.limiter
    }

    /// Starts a loop for `txn_ref_no` unless one is already running.
    ///
    /// Returns `true` only when this call spawned the loop.
    pub async fn start(self: &Arc<Self>, txn_ref_no: &str) -> bool {
        if *self.shutdown_tx.borrow() {
            debug!(txn_ref_no = %txn_ref_no, "supervisor shut down; not starting poll loop");
            return false;
        }
        if self.has_live_loop(txn_ref_no) {
            debug!(txn_ref_no = %txn_ref_no, "poll loop already running in this process");
            return false;
        }

        match self.store.claim_polling(txn_ref_no).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(txn_ref_no = %txn_ref_no, "polling already claimed");
                return false;
            }
            Err(e) => {
                warn!(txn_ref_no = %txn_ref_no, error = %e, "failed to claim polling flag");
                return false;
            }
        }

        let this = Arc::clone(self);
        let reference = txn_ref_no.to_string();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move { this.run_loop(reference, shutdown_rx).await });

        self.with_loops(|loops| {
            prune_finished(loops);
            loops.insert(txn_ref_no.to_string(), handle)
        });

        info!(
            txn_ref_no = %txn_ref_no,
            interval_secs = self.config.interval.as_secs(),
            deadline_secs = self.config.deadline.as_secs(),
            "poll loop started"
        );
        true
    }

    /// Waits for the loop for `txn_ref_no` and removes it from the registry.
    pub async fn join(&self, txn_ref_no: &str) -> Option<PollOutcome> {
        let handle = self.with_loops(|loops| loops.remove(txn_ref_no))?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(txn_ref_no = %txn_ref_no, error = %e, "poll loop task failed");
                None
            }
        }
    }

    /// Number of handles held in the registry, finished or not.
    pub fn registered_loops(&self) -> usize {
        self.with_loops(|loops| loops.len())
    }

    /// Number of loops that have not finished yet.
    pub fn active_loops(&self) -> usize {
        self.with_loops(|loops| loops.values().filter(|h| !h.is_finished()).count())
    }

    /// Signals every loop to stop and waits for all of them.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<(String, JoinHandle<PollOutcome>)> =
            self.with_loops(|loops| loops.drain().collect());

        info!(loops = handles.len(), "stopping poll loops");
        let (refs, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = futures::future::join_all(handles).await;
        for (txn_ref_no, result) in refs.iter().zip(results) {
            if let Err(e) = result {
                error!(txn_ref_no = %txn_ref_no, error = %e, "poll loop task failed");
            }
        }
    }

    fn has_live_loop(&self, txn_ref_no: &str) -> bool {
        self.with_loops(|loops| {
            loops
                .get(txn_ref_no)
                .map(|h| !h.is_finished())
                .unwrap_or(false)
        })
    }

    fn with_loops<T>(&self, f: impl FnOnce(&mut HashMap<String, JoinHandle<PollOutcome>>) -> T) -> T {
        match self.loops.lock() {
            Ok(mut loops) => f(&mut loops),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    // -----------------------------------------------------------------------
    // Loop body
    // -----------------------------------------------------------------------

    async fn run_loop(
        self: Arc<Self>,
        txn_ref_no: String,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> PollOutcome {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let mut ticker = interval_at(started + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            if *shutdown_rx.borrow() {
                break PollOutcome::Cancelled;
            }

            tokio::select! {
                biased;
                _ = sleep_until(deadline) => {
                    break self.expire(&txn_ref_no).await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break PollOutcome::Cancelled;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(status) = self.poll_once(&txn_ref_no, deadline).await {
                        match self.store.update_status(&txn_ref_no, status).await {
                            Ok(applied) => {
                                info!(
                                    txn_ref_no = %txn_ref_no,
                                    status = %status,
                                    applied,
                                    "poll loop settled transaction"
                                );
                                break PollOutcome::Settled(status);
                            }
                            Err(e) => {
                                error!(
                                    txn_ref_no = %txn_ref_no,
                                    status = %status,
                                    error = %e,
                                    "failed to persist polled status; retrying on next tick"
                                );
                            }
                        }
                    }
                }
            }
        };

        if let Err(e) = self.store.clear_polling(&txn_ref_no).await {
            error!(txn_ref_no = %txn_ref_no, error = %e, "failed to clear polling flag");
        }
        if outcome == PollOutcome::Cancelled {
            info!(txn_ref_no = %txn_ref_no, "poll loop cancelled");
        }
        outcome
    }

    /// One rate-limited inquiry. Returns the status only when it is terminal.
    async fn poll_once(&self, txn_ref_no: &str, deadline: Instant) -> Option<PaymentStatus> {
        let slot = match timeout_at(deadline, self.limiter.acquire()).await {
            Ok(slot) => slot,
            Err(_) => {
                warn!(txn_ref_no = %txn_ref_no, "deadline reached waiting for gateway slot");
                return None;
            }
        };

        let result = timeout_at(deadline, self.gateway.inquiry(txn_ref_no)).await;
        drop(slot);

        match result {
            Ok(Ok(result)) if result.status.is_terminal() => Some(result.status),
            Ok(Ok(result)) => {
                debug!(
                    txn_ref_no = %txn_ref_no,
                    status = %result.status,
                    response_code = %result.response_code,
                    "transaction still open"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(txn_ref_no = %txn_ref_no, error = %e, "inquiry failed");
                None
            }
            Err(_) => {
                warn!(txn_ref_no = %txn_ref_no, "deadline reached during inquiry");
                None
            }
        }
    }

    async fn expire(&self, txn_ref_no: &str) -> PollOutcome {
        match self
            .store
            .update_status(txn_ref_no, PaymentStatus::Failed)
            .await
        {
            Ok(applied) => {
                warn!(
                    txn_ref_no = %txn_ref_no,
                    applied,
                    deadline_secs = self.config.deadline.as_secs(),
                    "poll deadline reached; transaction marked failed"
                );
            }
            Err(e) => {
                error!(
                    txn_ref_no = %txn_ref_no,
                    error = %e,
                    "failed to mark timed-out transaction as failed"
                );
            }
        }
        PollOutcome::TimedOut
    }
}

/// Drops handles of loops that already ended, logging how each one ended.
fn prune_finished(loops: &mut HashMap<String, JoinHandle<PollOutcome>>) {
    loops.retain(|txn_ref_no, handle| {
        if !handle.is_finished() {
            return true;
        }
        match handle.now_or_never() {
            Some(Ok(outcome)) => {
                debug!(txn_ref_no = %txn_ref_no, outcome = ?outcome, "pruned finished poll loop")
            }
            Some(Err(e)) => {
                error!(txn_ref_no = %txn_ref_no, error = %e, "poll loop task failed")
            }
            None => return true,
        }
        false
    });
}
