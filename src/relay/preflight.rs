// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pre-cycle checks: both wallets synced, unlocked and fee-configured.

use tracing::{debug, warn};

use crate::ledger::{Amount, Ledger, LedgerKind, RpcError};

#[derive(Debug, thiserror::Error)]
pub enum PreFlightError {
    #[error("{ledger} ledger RPC failed: {source}")]
    Rpc {
        ledger: LedgerKind,
        #[source]
        source: RpcError,
    },

    #[error("{ledger} ledger is {lag} blocks behind (threshold {threshold})")]
    OutOfSync {
        ledger: LedgerKind,
        lag: u64,
        threshold: u64,
    },
}

impl PreFlightError {
    pub fn code(&self) -> &'static str {
        match self {
            PreFlightError::Rpc { .. } => "PREFLIGHT_RPC",
            PreFlightError::OutOfSync { .. } => "PREFLIGHT_OUT_OF_SYNC",
        }
    }
}

/// Balances and heights observed by a successful preflight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreFlightReport {
    pub primary_balance: Amount,
    pub secondary_balance: Amount,
    pub primary_height: u64,
    pub secondary_height: u64,
}

struct LedgerReady {
    balance: Amount,
    height: u64,
}

async fn prepare(ledger: &Ledger) -> Result<LedgerReady, PreFlightError> {
    let rpc_err = |source: RpcError| PreFlightError::Rpc {
        ledger: ledger.kind(),
        source,
    };

    let status = ledger.sync_status().await.map_err(rpc_err)?;
    if !status.is_within(ledger.sync_threshold()) {
        return Err(PreFlightError::OutOfSync {
            ledger: ledger.kind(),
            lag: status.lag(),
            threshold: ledger.sync_threshold(),
        });
    }

    ledger.unlock().await.map_err(rpc_err)?;
    ledger
        .rpc()
        .set_tx_fee(ledger.tx_fee())
        .await
        .map_err(rpc_err)?;
    let balance = ledger.rpc().balance().await.map_err(rpc_err)?;

    debug!(ledger = %ledger.kind(), %balance, height = status.blocks, "ledger ready");
    Ok(LedgerReady {
        balance,
        height: status.blocks,
    })
}

/// Check and prepare both ledgers. Any failure fails the whole preflight.
pub async fn pre_flight(
    primary: &Ledger,
    secondary: &Ledger,
) -> Result<PreFlightReport, PreFlightError> {
    let p = prepare(primary).await?;
    let s = prepare(secondary).await?;
    Ok(PreFlightReport {
        primary_balance: p.balance,
        secondary_balance: s.balance,
        primary_height: p.height,
        secondary_height: s.height,
    })
}

/// Top up the keypool. Failures are logged and do not stop the cycle.
pub async fn refill_keypool(ledger: &Ledger, minimum: u64) {
    if let Err(e) = ledger.refill_keypool(minimum).await {
        warn!(ledger = %ledger.kind(), code = e.code(), error = %e, "keypool refill failed");
    }
}
