// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Incoming role.
//!
//! Deposits land on the primary service account as fragments. Once every
//! part of a group arrived, the group is flattened into secondary-ledger
//! fragments, each carrying a payout instruction encrypted for the chosen
//! outgoing peer. The deposited outputs are then consolidated onto the
//! peer's primary addresses together with the holding token.

use rand::Rng;
use tracing::{debug, error, info, warn};

use super::cycle::{CycleContext, CycleError, CycleSummary};
use super::partials::{group_partials, PartialGroup};
use super::peer::{retrieve_subchain_addresses, select_outgoing, PeerError, SelectedPeer};
use super::preflight::{pre_flight, refill_keypool, PreFlightReport};
use super::recovery::{return_all_to_senders, ReturnScope};
use super::send::{send_raw_transaction, send_to_address};
use super::Relay;
use crate::keys::{encrypt_json, PayoutPayload};
use crate::ledger::{Amount, LedgerTransaction, RawInput};
use crate::split::{flatten, split_across};

/// A complete group accepted for this cycle, with its fragment amounts.
#[derive(Debug, Clone)]
pub struct AdmittedGroup {
    pub group: PartialGroup,
    pub fragments: Vec<Amount>,
}

#[derive(Debug, Default)]
pub struct IncomingBatch {
    pub groups: Vec<AdmittedGroup>,
    pub to_return: Vec<LedgerTransaction>,
}

impl IncomingBatch {
    pub fn fragment_count(&self) -> usize {
        self.groups.iter().map(|g| g.fragments.len()).sum()
    }
}

/// Bounds a batch must stay within.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub min_amount: Amount,
    pub max_amount: Amount,
    pub fee_percent: f64,
    /// Secondary-ledger cost of one fragment transaction.
    pub fragment_cost: Amount,
    pub secondary_balance: Amount,
    /// Primary balance the peer reported; the batch must stay below it.
    pub peer_balance: Amount,
    pub max_fragments: usize,
}

impl Admission {
    fn new(relay: &Relay, preflight: &PreFlightReport, peer: &SelectedPeer) -> Self {
        let settings = relay.settings();
        Self {
            min_amount: settings.min_amount,
            max_amount: settings.max_amount,
            fee_percent: settings.transaction_fee,
            fragment_cost: settings.secondary_tx_cost,
            secondary_balance: preflight.secondary_balance,
            peer_balance: peer.node.nav_balance,
            max_fragments: settings.max_fragments_per_cycle,
        }
    }
}

/// Admit ready groups in arrival order.
///
/// Groups outside the amount range, or that cannot be flattened, are
/// returned. Admission stops at the first group the peer's balance, the
/// fragment ceiling or our secondary balance (one `fragment_cost` per
/// fragment) cannot cover; those groups stay on the ledger for the next
/// cycle.
pub fn admit(ready: Vec<PartialGroup>, limits: &Admission) -> IncomingBatch {
    let mut batch = IncomingBatch::default();
    let mut total = Amount::ZERO;
    let mut fragments_total = 0;

    for group in ready {
        if group.amount < limits.min_amount || group.amount > limits.max_amount {
            info!(
                correlation_id = %group.correlation_id,
                amount = %group.amount,
                "group amount out of range, returning"
            );
            batch.to_return.extend(group.ledger_transactions().cloned());
            continue;
        }

        if total + group.amount >= limits.peer_balance {
            debug!(correlation_id = %group.correlation_id, "peer balance exhausted");
            break;
        }

        let fragments = match flatten(group.amount, limits.fee_percent) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(
                    correlation_id = %group.correlation_id,
                    code = e.code(),
                    error = %e,
                    "group cannot be flattened, returning"
                );
                batch.to_return.extend(group.ledger_transactions().cloned());
                continue;
            }
        };
        if fragments_total + fragments.len() > limits.max_fragments {
            debug!(correlation_id = %group.correlation_id, "fragment ceiling reached");
            break;
        }
        // Every fragment is its own secondary transaction.
        let cost = limits
            .fragment_cost
            .checked_mul((fragments_total + fragments.len()) as u64);
        if cost.map_or(true, |cost| cost > limits.secondary_balance) {
            debug!(correlation_id = %group.correlation_id, "secondary balance exhausted");
            break;
        }

        total += group.amount;
        fragments_total += fragments.len();
        batch.groups.push(AdmittedGroup { group, fragments });
    }

    batch
}

/// Gather confirmed deposits, reassemble them and admit a batch.
pub async fn prepare_incoming(
    relay: &Relay,
    preflight: &PreFlightReport,
    peer: &SelectedPeer,
) -> Result<IncomingBatch, CycleError> {
    let settings = relay.settings();
    let candidates = relay
        .primary()
        .service_unspent(settings.min_confirmations)
        .await?;
    if candidates.is_empty() {
        return Ok(IncomingBatch::default());
    }

    let ring = relay.keys().key_ring()?;
    let grouped = group_partials(
        relay.primary(),
        &ring,
        candidates,
        settings.stale_confirmations,
    )
    .await;

    let mut batch = admit(grouped.ready, &Admission::new(relay, preflight, peer));
    batch.to_return.extend(grouped.to_return);
    Ok(batch)
}

/// Release height for a payout: a random point within the group's delay.
pub fn time_lock<R: Rng + ?Sized>(
    rng: &mut R,
    time_delay_secs: u64,
    block_interval_secs: u64,
    height: u64,
) -> Option<u64> {
    if time_delay_secs == 0 {
        return None;
    }
    let blocks = time_delay_secs / block_interval_secs.max(1);
    Some(height + rng.gen_range(0..=blocks))
}

/// Forward every admitted group to the peer.
///
/// Returns the number of groups fully forwarded. A group whose first
/// fragment cannot be sent is skipped; a failure after that is fatal.
pub async fn process_incoming(
    relay: &Relay,
    groups: Vec<AdmittedGroup>,
    peer: &SelectedPeer,
    addresses: Vec<String>,
    primary_height: u64,
) -> Result<usize, CycleError> {
    let settings = relay.settings();
    let mut addresses = addresses.into_iter();
    let mut processed = 0;

    for AdmittedGroup { group, fragments } in groups {
        let targets: Vec<String> = addresses.by_ref().take(fragments.len()).collect();
        if targets.len() < fragments.len() {
            return Err(PeerError::NotEnoughAddresses {
                wanted: fragments.len(),
                got: targets.len(),
            }
            .into());
        }

        let payloads = match seal_payouts(relay, &group, &fragments, peer, primary_height) {
            Ok(payloads) => payloads,
            Err(e) => {
                warn!(
                    correlation_id = %group.correlation_id,
                    error = %e,
                    "could not encrypt payouts, group skipped"
                );
                continue;
            }
        };

        let total = payloads.len();
        let mut forwarded = true;
        for (sent, (address, payload)) in targets.iter().zip(&payloads).enumerate() {
            match send_to_address(
                relay.secondary(),
                relay.retry(),
                address,
                settings.secondary_tx_cost,
                Some(payload),
            )
            .await
            {
                Ok(txid) => debug!(correlation_id = %group.correlation_id, %txid, "fragment sent"),
                Err(e) if sent == 0 => {
                    warn!(
                        correlation_id = %group.correlation_id,
                        code = e.code(),
                        error = %e,
                        "first fragment failed, group skipped"
                    );
                    forwarded = false;
                    break;
                }
                Err(source) => {
                    return Err(CycleError::PartialGroup {
                        correlation_id: group.correlation_id.clone(),
                        sent,
                        total,
                        source,
                    })
                }
            }
        }
        if !forwarded {
            continue;
        }

        consolidate_group(relay, &group, peer).await?;
        info!(
            correlation_id = %group.correlation_id,
            fragments = total,
            amount = %group.amount,
            "group forwarded"
        );
        processed += 1;
    }

    Ok(processed)
}

fn seal_payouts(
    relay: &Relay,
    group: &PartialGroup,
    fragments: &[Amount],
    peer: &SelectedPeer,
    primary_height: u64,
) -> Result<Vec<String>, crate::keys::PayloadError> {
    let settings = relay.settings();
    let mut rng = rand::thread_rng();
    fragments
        .iter()
        .map(|amount| {
            let payout = PayoutPayload {
                n: group.destination.clone(),
                v: *amount,
                s: settings.shared_secret.clone(),
                t: time_lock(
                    &mut rng,
                    group.time_delay,
                    settings.block_interval_secs,
                    primary_height,
                ),
            };
            encrypt_json(&peer.public_key, &payout)
        })
        .collect()
}

/// Spend the group's deposits onto the peer's primary addresses.
async fn consolidate_group(
    relay: &Relay,
    group: &PartialGroup,
    peer: &SelectedPeer,
) -> Result<String, CycleError> {
    let holding_err = |reason: String| CycleError::Holding {
        correlation_id: group.correlation_id.clone(),
        reason,
    };

    let primary = relay.primary();
    let amount = group
        .amount
        .checked_sub(primary.tx_fee())
        .filter(|a| !a.is_zero())
        .ok_or_else(|| holding_err("amount does not cover the fee".to_string()))?;
    let outputs = split_across(&mut rand::thread_rng(), amount, &peer.node.nav_addresses)
        .map_err(|e| holding_err(e.to_string()))?;
    let inputs: Vec<RawInput> = group.ledger_transactions().map(|tx| tx.input()).collect();

    send_raw_transaction(
        primary,
        relay.retry(),
        &inputs,
        &outputs,
        Some(&peer.holding_token),
    )
    .await
    .map_err(|e| holding_err(e.to_string()))
}

/// One incoming cycle after key maintenance.
pub async fn run(relay: &Relay, ctx: &CycleContext) -> Result<CycleSummary, CycleError> {
    let settings = relay.settings();
    let preflight = pre_flight(relay.primary(), relay.secondary()).await?;
    refill_keypool(relay.secondary(), settings.keypool_min).await;

    let peer = match select_outgoing(relay, &settings.peers.urls, ctx.started_at).await {
        Ok(peer) => peer,
        Err(PeerError::NoValidPeer) => {
            error!(code = "NO_VALID_PEER", "no outgoing peer available, returning deposits");
            let report = return_all_to_senders(
                relay.primary(),
                relay.retry(),
                ReturnScope::All {
                    min_confirmations: settings.min_confirmations,
                },
            )
            .await?;
            return Ok(CycleSummary {
                returned: report.returned.len(),
                ..CycleSummary::default()
            });
        }
        Err(e) => return Err(e.into()),
    };

    let mut batch = prepare_incoming(relay, &preflight, &peer).await?;
    let mut summary = CycleSummary::default();

    if !batch.to_return.is_empty() {
        let report = return_all_to_senders(
            relay.primary(),
            relay.retry(),
            ReturnScope::Targeted(std::mem::take(&mut batch.to_return)),
        )
        .await?;
        summary.returned = report.returned.len();
    }
    if batch.groups.is_empty() {
        return Ok(summary);
    }

    let admitted = batch.groups.len();
    let addresses = retrieve_subchain_addresses(relay, &peer, batch.fragment_count()).await?;
    summary.processed = process_incoming(
        relay,
        batch.groups,
        &peer,
        addresses,
        preflight.primary_height,
    )
    .await?;
    summary.skipped = admitted - summary.processed;
    Ok(summary)
}
