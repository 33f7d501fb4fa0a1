// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cycle State Machine
//!
//! ```text
//! idle -> preflight -> refill -> peer-select (incoming) -> prepare -> execute -> recover/holding -> idle
//! ```
//!
//! The [`CycleRunner`] starts a cycle every interval. Entry is a no-op while
//! a previous cycle still runs or after the relay was paused. Failures
//! before funds move are soft and retried next interval; failures that put
//! custody at risk pause the relay until an operator intervenes.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. Cycles run on the runner's
//! own task and the token is only checked between cycles, so a cycle in
//! flight always completes before the runner returns.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::peer::PeerError;
use super::preflight::PreFlightError;
use super::recovery::RecoveryError;
use super::send::SendError;
use super::{incoming, outgoing, Relay};
use crate::config::Role;
use crate::keys::{key_stamp, KeyError};
use crate::ledger::RpcError;

/// Flags shared between the runner, its cycles and the HTTP handlers.
#[derive(Debug, Default)]
pub struct ServerState {
    processing: AtomicBool,
    paused: AtomicBool,
    last_key_sweep: AtomicI64,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Claim the processing flag. `None` if a cycle is already running.
    pub fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleGuard { state: self })
    }

    /// Record a key sweep for `stamp`. Returns false if one already ran.
    fn claim_key_sweep(&self, stamp: i64) -> bool {
        self.last_key_sweep.swap(stamp, Ordering::SeqCst) != stamp
    }
}

/// Clears the processing flag when the cycle ends, on every path.
#[derive(Debug)]
pub struct CycleGuard<'a> {
    state: &'a ServerState,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.state.processing.store(false, Ordering::SeqCst);
    }
}

/// Per-cycle values, created at entry and dropped at exit.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl CycleContext {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    PreFlight(#[from] PreFlightError),

    #[error(transparent)]
    Keys(#[from] KeyError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("group {correlation_id}: {sent} of {total} fragments sent before {source}")]
    PartialGroup {
        correlation_id: String,
        sent: usize,
        total: usize,
        #[source]
        source: SendError,
    },

    #[error("group {correlation_id} sent but holding consolidation failed: {reason}")]
    Holding {
        correlation_id: String,
        reason: String,
    },

    #[error("payout {txid} paid but its fragment was not returned: {source}")]
    SubnavNotReturned {
        txid: String,
        #[source]
        source: RecoveryError,
    },
}

impl CycleError {
    pub fn code(&self) -> &'static str {
        match self {
            CycleError::PreFlight(e) => e.code(),
            CycleError::Keys(e) => e.code(),
            CycleError::Peer(e) => e.code(),
            CycleError::Rpc(e) => e.code(),
            CycleError::PartialGroup { .. } => "PARTIAL_GROUP_SENT",
            CycleError::Holding { .. } => "HOLDING_FAILED",
            CycleError::SubnavNotReturned { .. } => "SUBNAV_NOT_RETURNED",
        }
    }

    /// Funds have left custody in a state the next cycle cannot repair.
    pub fn is_custody_risk(&self) -> bool {
        matches!(
            self,
            CycleError::PartialGroup { .. }
                | CycleError::Holding { .. }
                | CycleError::SubnavNotReturned { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Groups forwarded (incoming) or payouts released (outgoing).
    pub processed: usize,
    pub returned: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed(CycleSummary),
    Failed { code: &'static str, paused: bool },
}

impl Relay {
    /// Run one cycle for this relay's role.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.state().is_paused() {
            debug!(role = %self.role(), "relay paused, cycle skipped");
            return CycleOutcome::Skipped(SkipReason::Paused);
        }
        let Some(_guard) = self.state().try_begin() else {
            info!(role = %self.role(), "previous cycle still running, skipped");
            return CycleOutcome::Skipped(SkipReason::Busy);
        };

        let ctx = CycleContext::new(Utc::now());
        let span = info_span!("cycle", role = %self.role(), cycle_id = %ctx.id);
        async move {
            debug!("cycle started");
            let result = self.cycle_steps(&ctx).await;
            self.lock_wallets().await;
            self.finish(result)
        }
        .instrument(span)
        .await
    }

    async fn cycle_steps(&self, ctx: &CycleContext) -> Result<CycleSummary, CycleError> {
        self.maintain_keys(ctx.started_at).await?;
        match self.role() {
            Role::Incoming => incoming::run(self, ctx).await,
            Role::Outgoing => outgoing::run(self, ctx).await,
        }
    }

    /// Create today's keypair if needed and sweep expired keys once a day.
    async fn maintain_keys(&self, now: DateTime<Utc>) -> Result<(), KeyError> {
        self.keys().prepare_current(now).await?;
        if self.state().claim_key_sweep(key_stamp(now)) {
            self.keys().remove_expired(now)?;
        }
        Ok(())
    }

    async fn lock_wallets(&self) {
        for ledger in [self.primary(), self.secondary()] {
            if let Err(e) = ledger.lock().await {
                warn!(ledger = %ledger.kind(), error = %e, "failed to lock wallet");
            }
        }
    }

    fn finish(&self, result: Result<CycleSummary, CycleError>) -> CycleOutcome {
        match result {
            Ok(summary) => {
                info!(
                    processed = summary.processed,
                    returned = summary.returned,
                    skipped = summary.skipped,
                    "cycle complete"
                );
                CycleOutcome::Completed(summary)
            }
            Err(e) if e.is_custody_risk() => {
                error!(code = e.code(), error = %e, "custody at risk, pausing relay");
                self.state().pause();
                CycleOutcome::Failed {
                    code: e.code(),
                    paused: true,
                }
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "cycle aborted, retrying next interval");
                CycleOutcome::Failed {
                    code: e.code(),
                    paused: false,
                }
            }
        }
    }
}

/// Background task starting a cycle every interval.
pub struct CycleRunner {
    relay: Arc<Relay>,
    interval: Duration,
}

impl CycleRunner {
    pub fn new(relay: Arc<Relay>) -> Self {
        let interval = Duration::from_secs(relay.settings().cycle_interval_secs);
        Self { relay, interval }
    }

    /// Run until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task and awaited on shutdown:
    /// ```rust,ignore
    /// let cycles = tokio::spawn(runner.run(shutdown.clone()));
    /// shutdown.cancel();
    /// cycles.await?;
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            role = %self.relay.role(),
            interval_secs = self.interval.as_secs(),
            "cycle runner starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("cycle runner shutting down");
                return;
            }

            if self.relay.state().is_paused() {
                warn!("relay paused, waiting for manual recovery");
            } else {
                self.relay.run_cycle().await;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("cycle runner shutting down");
                    return;
                }
            }
        }
    }
}
