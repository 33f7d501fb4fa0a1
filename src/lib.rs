// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! navrelay - Anonymizing Relay Server
//!
//! One binary, two roles. An incoming server reassembles fragmented
//! deposits on the primary ledger and forwards them as encrypted payout
//! instructions across the secondary ledger; an outgoing server opens the
//! instructions and releases the funds on the primary ledger.
//!
//! ## Modules
//!
//! - `api` - peer HTTP endpoints (Axum)
//! - `keys` - daily RSA keypairs and the payload codec
//! - `ledger` - wallet daemon JSON-RPC client and helpers
//! - `relay` - the per-role cycle pipeline
//! - `split` - amount flattening and randomized splitting

pub mod api;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod models;
pub mod relay;
pub mod split;
pub mod state;
