// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Partial-payment reassembly.
//!
//! A deposit arrives as several independent transactions, each carrying an
//! encrypted [`FragmentPayload`] naming its part index and the correlation
//! id shared by its siblings. Fragments are merged into a [`PartialGroup`]
//! per correlation id. A group is ready once every part arrived exactly
//! once, after which it is closed to further fragments.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::keys::{FragmentPayload, KeyRing, PayloadError};
use crate::ledger::{Amount, Ledger, LedgerTransaction};

/// Why a fragment was not merged into its group.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("transaction carries no payload")]
    NoPayload,

    #[error("payload could not be opened: {0}")]
    Unreadable(String),

    #[error("group {0} is already complete")]
    GroupClosed(String),

    #[error("destination differs from the group's")]
    DestinationMismatch,

    #[error("transaction already recorded in the group")]
    DuplicateTransaction,

    #[error("part {part} is outside 1..={parts}")]
    PartOutOfRange { part: u32, parts: u32 },

    #[error("part count {got} differs from the group's {expected}")]
    PartCountMismatch { expected: u32, got: u32 },
}

impl From<PayloadError> for Rejection {
    fn from(error: PayloadError) -> Self {
        Rejection::Unreadable(error.code().to_string())
    }
}

/// One fragment recorded in a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedFragment {
    pub transaction: LedgerTransaction,
    pub part: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialGroup {
    pub correlation_id: String,
    pub destination: String,
    /// Maximum release delay in seconds.
    pub time_delay: u64,
    pub parts: u32,
    pub parts_sum: u64,
    pub amount: Amount,
    pub transactions: BTreeMap<String, GroupedFragment>,
    pub ready: bool,
}

impl PartialGroup {
    fn new(payload: &FragmentPayload) -> Self {
        Self {
            correlation_id: payload.u.clone(),
            destination: payload.n.clone(),
            time_delay: payload.t,
            parts: payload.o,
            parts_sum: 0,
            amount: Amount::ZERO,
            transactions: BTreeMap::new(),
            ready: false,
        }
    }

    /// Merge a fragment. A rejected fragment leaves the group untouched.
    pub fn merge(
        &mut self,
        transaction: LedgerTransaction,
        payload: &FragmentPayload,
    ) -> Result<(), Rejection> {
        if self.ready {
            return Err(Rejection::GroupClosed(self.correlation_id.clone()));
        }
        if payload.n != self.destination {
            return Err(Rejection::DestinationMismatch);
        }
        if payload.o != self.parts {
            return Err(Rejection::PartCountMismatch {
                expected: self.parts,
                got: payload.o,
            });
        }
        if payload.p == 0 || payload.p > self.parts {
            return Err(Rejection::PartOutOfRange {
                part: payload.p,
                parts: self.parts,
            });
        }
        if self.transactions.contains_key(&transaction.txid) {
            return Err(Rejection::DuplicateTransaction);
        }

        self.parts_sum += u64::from(payload.p);
        self.amount += transaction.amount;
        self.transactions.insert(
            transaction.txid.clone(),
            GroupedFragment {
                transaction,
                part: payload.p,
            },
        );
        self.ready = self.is_complete();
        Ok(())
    }

    fn is_complete(&self) -> bool {
        let parts = u64::from(self.parts);
        self.transactions.len() as u64 == parts && self.parts_sum == parts * (parts + 1) / 2
    }

    /// The ledger transactions of every recorded fragment.
    pub fn ledger_transactions(&self) -> impl Iterator<Item = &LedgerTransaction> {
        self.transactions.values().map(|f| &f.transaction)
    }
}

#[derive(Debug, Default)]
pub struct Grouped {
    /// Complete groups in the order their first fragment was seen.
    pub ready: Vec<PartialGroup>,
    pub to_return: Vec<LedgerTransaction>,
}

/// Merge opened fragments into groups and classify them.
///
/// Rejected fragments are returned. Fragments of incomplete groups are
/// returned once their confirmations exceed `stale_confirmations`.
pub fn group_fragments(
    fragments: Vec<(LedgerTransaction, Result<FragmentPayload, Rejection>)>,
    stale_confirmations: u64,
) -> Grouped {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, PartialGroup> = HashMap::new();
    let mut grouped = Grouped::default();

    for (transaction, payload) in fragments {
        let payload = match payload {
            Ok(payload) => payload,
            Err(rejection) => {
                debug!(txid = %transaction.txid, %rejection, "fragment rejected");
                grouped.to_return.push(transaction);
                continue;
            }
        };

        let group = groups.entry(payload.u.clone()).or_insert_with(|| {
            order.push(payload.u.clone());
            PartialGroup::new(&payload)
        });

        if let Err(rejection) = group.merge(transaction.clone(), &payload) {
            warn!(
                txid = %transaction.txid,
                correlation_id = %payload.u,
                %rejection,
                "fragment rejected"
            );
            grouped.to_return.push(transaction);
        }
    }

    for correlation_id in order {
        let Some(group) = groups.remove(&correlation_id) else {
            continue;
        };
        if group.ready {
            grouped.ready.push(group);
            continue;
        }
        grouped.to_return.extend(
            group
                .ledger_transactions()
                .filter(|tx| tx.confirmations > stale_confirmations)
                .cloned(),
        );
    }

    grouped
}

/// Fetch and open each candidate's payload, then group them.
///
/// Candidates whose payload cannot be fetched because of an RPC failure are
/// left for the next cycle.
pub async fn group_partials(
    ledger: &Ledger,
    ring: &KeyRing,
    candidates: Vec<LedgerTransaction>,
    stale_confirmations: u64,
) -> Grouped {
    let mut fragments = Vec::with_capacity(candidates.len());

    for transaction in candidates {
        let wallet_tx = match ledger.rpc().transaction(&transaction.txid).await {
            Ok(wallet_tx) => wallet_tx,
            Err(e) => {
                warn!(txid = %transaction.txid, error = %e, "could not fetch transaction");
                continue;
            }
        };

        let payload = match wallet_tx.anon_destination.as_deref() {
            Some(ciphertext) if !ciphertext.is_empty() => {
                ring.decrypt::<FragmentPayload>(ciphertext).map_err(Rejection::from)
            }
            _ => Err(Rejection::NoPayload),
        };
        fragments.push((transaction, payload));
    }

    group_fragments(fragments, stale_confirmations)
}
