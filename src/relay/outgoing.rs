// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outgoing role.
//!
//! Partners send secondary-ledger fragments to our service account, each
//! carrying a payout instruction encrypted with our key. A valid
//! instruction is paid on the primary ledger and its fragment sent back to
//! the partner, so the same instruction can never be paid twice. Primary
//! funds that reached the service account are then moved to the holding
//! account.

use tracing::{debug, error, info, warn};

use super::cycle::{CycleContext, CycleError, CycleSummary};
use super::preflight::{pre_flight, refill_keypool, PreFlightReport};
use super::recovery::return_to_sender;
use super::send::{send_raw_transaction, send_to_address, SendError};
use super::Relay;
use crate::keys::{KeyRing, PayloadError, PayoutPayload};
use crate::ledger::{push_output, Amount, LedgerTransaction, Outputs, RawInput, RpcError};
use crate::split::{split_random_count, SplitError};

/// Why a payout instruction will never be paid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayoutRejection {
    #[error("transaction carries no payload")]
    NoPayload,

    #[error("payload could not be opened: {0}")]
    Unreadable(&'static str),

    #[error("payload is missing fields")]
    MissingFields,

    #[error("amount {0} is zero or above the maximum")]
    InvalidAmount(Amount),

    #[error("shared secret does not match")]
    WrongSecret,

    #[error("destination {0} is not a valid address")]
    InvalidDestination(String),
}

impl From<PayloadError> for PayoutRejection {
    fn from(error: PayloadError) -> Self {
        match error {
            PayloadError::MissingFields(_) => PayoutRejection::MissingFields,
            other => PayoutRejection::Unreadable(other.code()),
        }
    }
}

/// A payout instruction together with the fragment that carried it.
#[derive(Debug, Clone, PartialEq)]
pub struct Payout {
    pub transaction: LedgerTransaction,
    pub payout: PayoutPayload,
}

#[derive(Debug, Default)]
pub struct OutgoingBatch {
    pub payouts: Vec<Payout>,
    pub failed: Vec<(LedgerTransaction, PayoutRejection)>,
    /// Valid payouts left for a later cycle: time-locked or over budget.
    pub deferred: usize,
}

/// Checks that need no ledger access.
pub fn check_payout(
    payout: &PayoutPayload,
    shared_secret: &str,
    max_amount: Amount,
) -> Result<(), PayoutRejection> {
    if payout.n.is_empty() || payout.s.is_empty() {
        return Err(PayoutRejection::MissingFields);
    }
    if payout.v.is_zero() || payout.v > max_amount {
        return Err(PayoutRejection::InvalidAmount(payout.v));
    }
    if payout.s != shared_secret {
        return Err(PayoutRejection::WrongSecret);
    }
    Ok(())
}

/// Whether the payout's release height has been reached.
pub fn is_released(payout: &PayoutPayload, height: u64) -> bool {
    payout.t.map_or(true, |t| t <= height)
}

/// Pay in arrival order while the running total stays under `balance`,
/// stopping at the first payout that does not fit.
pub fn admit(valid: Vec<Payout>, balance: Amount, max_payouts: usize) -> (Vec<Payout>, usize) {
    let mut admitted = Vec::new();
    let mut total = Amount::ZERO;
    let mut remaining = valid.into_iter();

    for payout in remaining.by_ref() {
        if admitted.len() >= max_payouts || total + payout.payout.v >= balance {
            debug!(txid = %payout.transaction.txid, "payout budget reached");
            return (admitted, 1 + remaining.count());
        }
        total += payout.payout.v;
        admitted.push(payout);
    }
    (admitted, 0)
}

enum Opened {
    /// Could not be fetched; left for the next cycle.
    Unavailable,
    Rejected(PayoutRejection),
    Valid(PayoutPayload),
}

async fn open_payout(
    relay: &Relay,
    ring: &KeyRing,
    transaction: &LedgerTransaction,
) -> Result<Opened, RpcError> {
    let wallet_tx = match relay.secondary().rpc().transaction(&transaction.txid).await {
        Ok(wallet_tx) => wallet_tx,
        Err(e) => {
            warn!(txid = %transaction.txid, error = %e, "could not fetch transaction");
            return Ok(Opened::Unavailable);
        }
    };
    let opened = match wallet_tx.anon_destination.as_deref() {
        Some(ciphertext) if !ciphertext.is_empty() => ring.decrypt::<PayoutPayload>(ciphertext),
        _ => return Ok(Opened::Rejected(PayoutRejection::NoPayload)),
    };
    let payout = match opened {
        Ok(payout) => payout,
        Err(e) => return Ok(Opened::Rejected(e.into())),
    };

    let settings = relay.settings();
    if let Err(rejection) = check_payout(&payout, &settings.shared_secret, settings.max_amount) {
        return Ok(Opened::Rejected(rejection));
    }
    if !relay.primary().rpc().validate_address(&payout.n).await? {
        return Ok(Opened::Rejected(PayoutRejection::InvalidDestination(payout.n)));
    }
    Ok(Opened::Valid(payout))
}

/// Open every pending fragment and admit a batch of payouts.
pub async fn prepare_outgoing(
    relay: &Relay,
    preflight: &PreFlightReport,
) -> Result<OutgoingBatch, CycleError> {
    let settings = relay.settings();
    let candidates = relay
        .secondary()
        .service_unspent(settings.min_confirmations)
        .await?;
    let mut batch = OutgoingBatch::default();
    if candidates.is_empty() {
        return Ok(batch);
    }

    let ring = relay.keys().key_ring()?;
    let mut valid = Vec::new();
    for transaction in candidates {
        match open_payout(relay, &ring, &transaction).await? {
            Opened::Unavailable => {}
            Opened::Rejected(rejection) => batch.failed.push((transaction, rejection)),
            Opened::Valid(payout) if !is_released(&payout, preflight.primary_height) => {
                debug!(txid = %transaction.txid, release = ?payout.t, "payout time-locked");
                batch.deferred += 1;
            }
            Opened::Valid(payout) => valid.push(Payout {
                transaction,
                payout,
            }),
        }
    }

    let (payouts, over_budget) = admit(
        valid,
        preflight.primary_balance,
        settings.max_fragments_per_cycle,
    );
    batch.payouts = payouts;
    batch.deferred += over_budget;
    Ok(batch)
}

/// Pay each admitted payout on the primary ledger.
///
/// A failed payment is logged and its fragment left for the next cycle.
/// Returns the payouts that were paid.
pub async fn process_outgoing(relay: &Relay, payouts: Vec<Payout>) -> Vec<Payout> {
    let mut paid = Vec::with_capacity(payouts.len());
    for payout in payouts {
        match send_to_address(
            relay.primary(),
            relay.retry(),
            &payout.payout.n,
            payout.payout.v,
            None,
        )
        .await
        {
            Ok(txid) => {
                info!(
                    fragment = %payout.transaction.txid,
                    %txid,
                    amount = %payout.payout.v,
                    "payout sent"
                );
                paid.push(payout);
            }
            Err(e) => error!(
                fragment = %payout.transaction.txid,
                code = e.code(),
                error = %e,
                "payout failed, retrying next cycle"
            ),
        }
    }
    paid
}

/// Send the fragment of every paid payout back to its sender.
///
/// Every return is attempted; the first failure is reported.
pub async fn return_subnav(relay: &Relay, paid: &[Payout]) -> Result<usize, CycleError> {
    let mut first_failure = None;
    let mut returned = 0;

    for payout in paid {
        match return_to_sender(relay.secondary(), relay.retry(), &payout.transaction).await {
            Ok(_) => returned += 1,
            Err(source) => {
                error!(
                    txid = %payout.transaction.txid,
                    code = source.code(),
                    error = %source,
                    "paid fragment not returned"
                );
                first_failure.get_or_insert(CycleError::SubnavNotReturned {
                    txid: payout.transaction.txid.clone(),
                    source,
                });
            }
        }
    }

    match first_failure {
        Some(e) => Err(e),
        None => Ok(returned),
    }
}

/// Refund rejected payouts. Failures are logged and retried next cycle.
async fn return_rejected(
    relay: &Relay,
    failed: Vec<(LedgerTransaction, PayoutRejection)>,
) -> usize {
    let mut returned = 0;
    for (transaction, rejection) in failed {
        error!(
            code = "PAYOUT_REJECTED",
            txid = %transaction.txid,
            %rejection,
            "payout rejected, returning fragment"
        );
        match return_to_sender(relay.secondary(), relay.retry(), &transaction).await {
            Ok(_) => returned += 1,
            Err(e) => warn!(txid = %transaction.txid, code = e.code(), error = %e, "return failed"),
        }
    }
    returned
}

#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("service funds do not cover the fee")]
    BelowFee,
}

impl ConsolidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ConsolidationError::Rpc(e) => e.code(),
            ConsolidationError::Split(e) => e.code(),
            ConsolidationError::Send(e) => e.code(),
            ConsolidationError::BelowFee => "HOLDING_BELOW_FEE",
        }
    }
}

/// Move confirmed service-account funds to fresh holding addresses in a
/// random number of fragments. Returns the consolidation txid, if any.
pub async fn consolidate_holding(relay: &Relay) -> Result<Option<String>, ConsolidationError> {
    let settings = relay.settings();
    let primary = relay.primary();
    let unspent = primary.service_unspent(settings.min_confirmations).await?;
    if unspent.is_empty() {
        return Ok(None);
    }

    let total: Amount = unspent.iter().map(|tx| tx.amount).sum();
    let amount = total
        .checked_sub(primary.tx_fee())
        .filter(|a| !a.is_zero())
        .ok_or(ConsolidationError::BelowFee)?;
    let fragments = split_random_count(
        &mut rand::thread_rng(),
        amount,
        settings.holding_fragments_min,
        settings.holding_fragments_max,
    )?;

    let mut outputs = Outputs::new();
    for fragment in fragments {
        let address = primary.fresh_address(primary.holding_account()).await?;
        push_output(&mut outputs, &address, fragment);
    }
    let inputs: Vec<RawInput> = unspent.iter().map(LedgerTransaction::input).collect();

    let txid = send_raw_transaction(primary, relay.retry(), &inputs, &outputs, None).await?;
    info!(%txid, %amount, outputs = outputs.len(), "service funds moved to holding");
    Ok(Some(txid))
}

/// One outgoing cycle after key maintenance.
pub async fn run(relay: &Relay, ctx: &CycleContext) -> Result<CycleSummary, CycleError> {
    let settings = relay.settings();
    let preflight = pre_flight(relay.primary(), relay.secondary()).await?;
    refill_keypool(relay.primary(), settings.keypool_min).await;

    let batch = prepare_outgoing(relay, &preflight).await?;
    debug!(
        started_at = %ctx.started_at,
        payouts = batch.payouts.len(),
        failed = batch.failed.len(),
        deferred = batch.deferred,
        "outgoing batch prepared"
    );

    let admitted = batch.payouts.len();
    let paid = process_outgoing(relay, batch.payouts).await;
    let mut summary = CycleSummary {
        processed: paid.len(),
        returned: 0,
        skipped: batch.deferred + admitted - paid.len(),
    };
    return_subnav(relay, &paid).await?;
    summary.returned = return_rejected(relay, batch.failed).await;

    if let Err(e) = consolidate_holding(relay).await {
        warn!(code = e.code(), error = %e, "holding consolidation failed, retrying next cycle");
    }
    Ok(summary)
}
