// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Relay Pipeline
//!
//! Everything a cycle needs, bundled in [`Relay`]:
//!
//! - [`preflight`]: sync check, unlock and fee setup on both ledgers
//! - [`peer`]: partner selection and address retrieval
//! - [`partials`]: reassembly of fragmented deposits
//! - [`incoming`] / [`outgoing`]: batch preparation and execution per role
//! - [`send`]: retrying send primitives
//! - [`recovery`]: refunds to the original sender
//! - [`cycle`]: the per-role state machine and its runner

pub mod cycle;
pub mod incoming;
pub mod outgoing;
pub mod partials;
pub mod peer;
pub mod preflight;
pub mod recovery;
pub mod send;

use std::sync::Arc;
use std::time::Duration;

pub use cycle::{CycleError, CycleOutcome, CycleRunner, ServerState};
pub use peer::{PeerClient, PeerError, SelectedPeer};
pub use send::RetryPolicy;

use crate::config::{LedgerSettings, Role, Settings};
use crate::keys::EncryptionKeys;
use crate::ledger::{JsonRpcClient, Ledger, LedgerKind, RpcError};

/// One relay instance: settings, both wallets, keys and shared state.
#[derive(Debug)]
pub struct Relay {
    settings: Settings,
    primary: Ledger,
    secondary: Ledger,
    keys: EncryptionKeys,
    peers: PeerClient,
    state: ServerState,
    retry: RetryPolicy,
}

impl Relay {
    pub fn new(
        settings: Settings,
        primary: Ledger,
        secondary: Ledger,
        keys: EncryptionKeys,
    ) -> Result<Self, PeerError> {
        let peers = PeerClient::new(Duration::from_secs(settings.peers.timeout_secs))?;
        let retry = RetryPolicy::from(settings.retry);
        Ok(Self {
            settings,
            primary,
            secondary,
            keys,
            peers,
            state: ServerState::new(),
            retry,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn role(&self) -> Role {
        self.settings.role
    }

    pub fn primary(&self) -> &Ledger {
        &self.primary
    }

    pub fn secondary(&self) -> &Ledger {
        &self.secondary
    }

    pub fn keys(&self) -> &EncryptionKeys {
        &self.keys
    }

    pub fn peers(&self) -> &PeerClient {
        &self.peers
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }
}

/// Build a wallet handle talking JSON-RPC to the configured daemon.
pub fn connect_ledger(kind: LedgerKind, settings: &LedgerSettings) -> Result<Ledger, RpcError> {
    let client = JsonRpcClient::new(
        settings.rpc_url.clone(),
        settings.rpc_user.clone(),
        settings.rpc_password.clone(),
    )?;
    Ok(Ledger::new(kind, Arc::new(client), settings.account.clone())
        .with_passphrase(
            settings.wallet_passphrase.clone(),
            settings.unlock_timeout_secs,
        )
        .with_holding_account(settings.holding_account.clone())
        .with_tx_fee(settings.tx_fee)
        .with_sync_threshold(settings.sync_threshold_blocks))
}
