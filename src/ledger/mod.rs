// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger daemon integration.
//!
//! This module provides:
//! - The [`LedgerRpc`] trait and its JSON-RPC transport
//! - Fixed-point [`Amount`] and the wire types the daemons return
//! - [`Ledger`], a wallet handle carrying the unlock passphrase and the
//!   service accounts, with the helpers the pipeline builds on

pub mod client;
pub mod helpers;
#[cfg(test)]
pub mod mock;
pub mod types;

use std::sync::Arc;

pub use client::{JsonRpcClient, LedgerRpc, RpcError};
pub use helpers::SyncStatus;
pub use types::*;

/// A wallet on one of the two ledgers.
#[derive(Clone)]
pub struct Ledger {
    kind: LedgerKind,
    rpc: Arc<dyn LedgerRpc>,
    passphrase: Option<String>,
    unlock_timeout_secs: u64,
    account: String,
    holding_account: String,
    tx_fee: Amount,
    sync_threshold: u64,
}

impl Ledger {
    pub fn new(kind: LedgerKind, rpc: Arc<dyn LedgerRpc>, account: impl Into<String>) -> Self {
        Self {
            kind,
            rpc,
            passphrase: None,
            unlock_timeout_secs: 60,
            account: account.into(),
            holding_account: String::new(),
            tx_fee: Amount::ZERO,
            sync_threshold: 0,
        }
    }

    /// Passphrase used to unlock an encrypted wallet.
    pub fn with_passphrase(mut self, passphrase: Option<String>, timeout_secs: u64) -> Self {
        self.passphrase = passphrase.filter(|p| !p.is_empty());
        self.unlock_timeout_secs = timeout_secs;
        self
    }

    pub fn with_holding_account(mut self, account: impl Into<String>) -> Self {
        self.holding_account = account.into();
        self
    }

    /// Fee set on the wallet each cycle and deducted from raw transactions.
    pub fn with_tx_fee(mut self, fee: Amount) -> Self {
        self.tx_fee = fee;
        self
    }

    /// Maximum tolerated gap between headers and validated blocks.
    pub fn with_sync_threshold(mut self, blocks: u64) -> Self {
        self.sync_threshold = blocks;
        self
    }

    pub fn kind(&self) -> LedgerKind {
        self.kind
    }

    pub fn rpc(&self) -> &dyn LedgerRpc {
        self.rpc.as_ref()
    }

    /// Account that receives deposits and hands out addresses.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Intermediate account used for consolidation.
    pub fn holding_account(&self) -> &str {
        &self.holding_account
    }

    pub fn tx_fee(&self) -> Amount {
        self.tx_fee
    }

    pub fn sync_threshold(&self) -> u64 {
        self.sync_threshold
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("kind", &self.kind)
            .field("account", &self.account)
            .field("encrypted", &self.passphrase.is_some())
            .finish()
    }
}
