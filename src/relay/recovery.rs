// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Refunds.
//!
//! A refund traces where an unspent output came from (the address paid by
//! the first input of its transaction) and spends exactly that output back
//! to it, less the ledger's transaction fee. Spending the output itself
//! means a refunded transaction can never be picked up again.

use tracing::{error, info, warn};

use super::send::{send_raw_transaction, RetryPolicy, SendError};
use crate::ledger::{push_output, Ledger, LedgerTransaction, Outputs, RpcError};

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("origin lookup failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("transaction {0} has no traceable input")]
    NoInput(String),

    #[error("funding output {vout} of {txid} has no address")]
    NoOriginAddress { txid: String, vout: u32 },

    #[error("amount of {0} does not cover the refund fee")]
    BelowFee(String),

    #[error("refund send failed: {0}")]
    Send(#[from] SendError),
}

impl RecoveryError {
    pub fn code(&self) -> &'static str {
        match self {
            RecoveryError::Rpc(_) => "RECOVERY_RPC",
            RecoveryError::NoInput(_) => "RECOVERY_NO_INPUT",
            RecoveryError::NoOriginAddress { .. } => "RECOVERY_NO_ORIGIN",
            RecoveryError::BelowFee(_) => "RECOVERY_BELOW_FEE",
            RecoveryError::Send(_) => "RECOVERY_SEND",
        }
    }
}

/// Which transactions a flush covers.
#[derive(Debug, Clone)]
pub enum ReturnScope {
    /// Every confirmed unspent output of the service account.
    All { min_confirmations: u64 },
    Targeted(Vec<LedgerTransaction>),
}

#[derive(Debug, Default)]
pub struct ReturnReport {
    /// `(original txid, refund txid)`
    pub returned: Vec<(String, String)>,
    pub failed: Vec<(String, RecoveryError)>,
}

impl ReturnReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Address that funded `transaction` through its first input.
pub async fn trace_origin(
    ledger: &Ledger,
    transaction: &LedgerTransaction,
) -> Result<String, RecoveryError> {
    let rpc = ledger.rpc();
    let raw = rpc.raw_transaction(&transaction.txid).await?;
    let decoded = rpc.decode_raw_transaction(&raw).await?;

    let (prev_txid, prev_vout) = decoded
        .vin
        .first()
        .and_then(|input| Some((input.txid.clone()?, input.vout?)))
        .ok_or_else(|| RecoveryError::NoInput(transaction.txid.clone()))?;

    let prev_raw = rpc.raw_transaction(&prev_txid).await?;
    let prev = rpc.decode_raw_transaction(&prev_raw).await?;

    prev.vout
        .iter()
        .find(|output| output.n == prev_vout)
        .and_then(|output| output.script_pub_key.addresses.first().cloned())
        .ok_or(RecoveryError::NoOriginAddress {
            txid: prev_txid,
            vout: prev_vout,
        })
}

/// Refund `transaction` to its origin. Returns the refund txid.
pub async fn return_to_sender(
    ledger: &Ledger,
    policy: RetryPolicy,
    transaction: &LedgerTransaction,
) -> Result<String, RecoveryError> {
    let origin = trace_origin(ledger, transaction).await?;
    let amount = transaction
        .amount
        .checked_sub(ledger.tx_fee())
        .filter(|a| !a.is_zero())
        .ok_or_else(|| RecoveryError::BelowFee(transaction.txid.clone()))?;

    let mut outputs = Outputs::new();
    push_output(&mut outputs, &origin, amount);

    let txid =
        send_raw_transaction(ledger, policy, &[transaction.input()], &outputs, None).await?;
    info!(
        ledger = %ledger.kind(),
        txid = %transaction.txid,
        refund = %txid,
        %origin,
        %amount,
        "returned to sender"
    );
    Ok(txid)
}

/// Refund every transaction in `scope`, continuing past failures.
pub async fn return_all_to_senders(
    ledger: &Ledger,
    policy: RetryPolicy,
    scope: ReturnScope,
) -> Result<ReturnReport, RpcError> {
    let transactions = match scope {
        ReturnScope::All { min_confirmations } => {
            warn!(ledger = %ledger.kind(), "returning all pending deposits to senders");
            ledger.service_unspent(min_confirmations).await?
        }
        ReturnScope::Targeted(transactions) => transactions,
    };

    let mut report = ReturnReport::default();
    for transaction in transactions {
        match return_to_sender(ledger, policy, &transaction).await {
            Ok(refund) => report.returned.push((transaction.txid, refund)),
            Err(e) => {
                error!(
                    ledger = %ledger.kind(),
                    txid = %transaction.txid,
                    code = e.code(),
                    error = %e,
                    "return to sender failed"
                );
                report.failed.push((transaction.txid, e));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::ledger::mock::MockLedger;
    use crate::ledger::{Amount, LedgerKind, RawInput};

    fn tx(txid: &str, coins: f64) -> LedgerTransaction {
        LedgerTransaction {
            txid: txid.to_string(),
            vout: 1,
            address: "Nservice1".to_string(),
            account: Some("service".to_string()),
            amount: Amount::from_coins(coins),
            confirmations: 3,
        }
    }

    fn ledger(mock: &Arc<MockLedger>) -> Ledger {
        Ledger::new(LedgerKind::Primary, mock.clone(), "service")
            .with_tx_fee(Amount::from_coins(0.0001))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::ZERO)
    }

    #[tokio::test]
    async fn origin_is_traced_through_first_input() {
        let mock = Arc::new(MockLedger::new().origin("dep", "fund", 2, "Nsender"));
        let origin = trace_origin(&ledger(&mock), &tx("dep", 5.0)).await.unwrap();
        assert_eq!(origin, "Nsender");
    }

    #[tokio::test]
    async fn refund_spends_exactly_the_output_less_fee() {
        let mock = Arc::new(
            MockLedger::new()
                .origin("dep", "fund", 0, "Nsender")
                .unspent(vec![tx("dep", 5.0)]),
        );
        return_to_sender(&ledger(&mock), policy(), &tx("dep", 5.0))
            .await
            .unwrap();

        let sent = mock.raw_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].inputs,
            vec![RawInput {
                txid: "dep".to_string(),
                vout: 1
            }]
        );
        assert_eq!(sent[0].outputs["Nsender"], Amount::from_coins(4.9999));
        assert!(mock.remaining_unspent().is_empty());
    }

    #[tokio::test]
    async fn dust_is_not_refunded() {
        let mock = Arc::new(MockLedger::new().origin("dep", "fund", 0, "Nsender"));
        let err = return_to_sender(&ledger(&mock), policy(), &tx("dep", 0.0001))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RECOVERY_BELOW_FEE");
    }

    #[tokio::test]
    async fn full_flush_continues_past_failures() {
        let mock = Arc::new(
            MockLedger::new()
                .origin("a", "fa", 0, "Nsa")
                .origin("c", "fc", 0, "Nsc")
                .unspent(vec![tx("a", 1.0), tx("b", 1.0), tx("c", 1.0)]),
        );
        let report = return_all_to_senders(
            &ledger(&mock),
            policy(),
            ReturnScope::All {
                min_confirmations: 1,
            },
        )
        .await
        .unwrap();

        let returned: Vec<&str> = report.returned.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(returned, vec!["a", "c"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn targeted_flush_touches_only_listed_transactions() {
        let mock = Arc::new(
            MockLedger::new()
                .origin("a", "fa", 0, "Nsa")
                .unspent(vec![tx("a", 1.0), tx("b", 1.0)]),
        );
        let report = return_all_to_senders(
            &ledger(&mock),
            policy(),
            ReturnScope::Targeted(vec![tx("a", 1.0)]),
        )
        .await
        .unwrap();

        assert!(report.is_clean());
        assert_eq!(mock.remaining_unspent().len(), 1);
        assert_eq!(mock.calls("listunspent"), 0);
    }
}
