// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Peer Protocol Models
//!
//! Request and response bodies exchanged between partner servers. Every
//! response is wrapped in an [`ApiResponse`] envelope and sent with HTTP
//! 200; the envelope's `type` carries the outcome.
//!
//! Request fields are optional on the wire so that a malformed request is
//! answered with a `FAIL` envelope rather than a bare extractor rejection.
//! Each request validates itself into a typed query.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::Role;
use crate::error::ApiError;
use crate::ledger::Amount;

/// The only address type `get-addresses` serves.
pub const SUBCHAIN_ADDRESS_TYPE: &str = "SUBCHAIN";

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseType {
    Success,
    /// The request was rejected.
    Fail,
    /// The server failed while handling a valid request.
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            kind: ResponseType::Success,
            code: None,
            message: None,
            data: Some(data),
        }
    }
}

// =============================================================================
// Server type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerType {
    Incoming,
    Outgoing,
}

impl From<Role> for ServerType {
    fn from(role: Role) -> Self {
        match role {
            Role::Incoming => ServerType::Incoming,
            Role::Outgoing => ServerType::Outgoing,
        }
    }
}

// =============================================================================
// check-node
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CheckNodeRequest {
    /// Number of primary-ledger addresses wanted.
    pub num_addresses: Option<usize>,
}

impl CheckNodeRequest {
    /// Validated address count in `1..=max`.
    pub fn num_addresses(&self, max: usize) -> Result<usize, ApiError> {
        validate_count(self.num_addresses, max)
    }
}

/// Node status reported to a partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckNodeData {
    #[schema(value_type = f64)]
    pub nav_balance: Amount,
    #[schema(value_type = f64)]
    pub sub_balance: Amount,
    /// PEM of the current public key.
    pub public_key: String,
    pub server_type: ServerType,
    #[schema(value_type = f64)]
    pub min_amount: Amount,
    #[schema(value_type = f64)]
    pub max_amount: Amount,
    /// Service fee in percent.
    pub transaction_fee: f64,
    pub server: String,
    pub server_port: u16,
    pub md5: String,
    /// Fresh primary-ledger addresses of the service account.
    pub nav_addresses: Vec<String>,
}

// =============================================================================
// get-addresses
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GetAddressesRequest {
    pub num_addresses: Option<usize>,
    /// Must be `SUBCHAIN`.
    #[serde(rename = "type")]
    pub address_type: Option<String>,
    pub account: Option<String>,
}

/// A validated `get-addresses` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressQuery {
    pub num_addresses: usize,
    pub account: String,
}

impl GetAddressesRequest {
    pub fn new(num_addresses: usize, account: impl Into<String>) -> Self {
        Self {
            num_addresses: Some(num_addresses),
            address_type: Some(SUBCHAIN_ADDRESS_TYPE.to_string()),
            account: Some(account.into()),
        }
    }

    pub fn validate(&self, max: usize) -> Result<AddressQuery, ApiError> {
        let num_addresses = validate_count(self.num_addresses, max)?;
        match self.address_type.as_deref() {
            Some(SUBCHAIN_ADDRESS_TYPE) => {}
            Some(other) => {
                return Err(ApiError::fail(
                    "INVALID_ADDRESS_TYPE",
                    format!("unsupported address type {other}"),
                ))
            }
            None => return Err(ApiError::fail("MISSING_FIELD", "type is required")),
        }
        let account = self
            .account
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ApiError::fail("MISSING_FIELD", "account is required"))?;

        Ok(AddressQuery {
            num_addresses,
            account: account.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AddressesData {
    pub addresses: Vec<String>,
}

fn validate_count(value: Option<usize>, max: usize) -> Result<usize, ApiError> {
    match value {
        None => Err(ApiError::fail("MISSING_FIELD", "num_addresses is required")),
        Some(n) if n == 0 || n > max => Err(ApiError::fail(
            "INVALID_NUM_ADDRESSES",
            format!("num_addresses must be between 1 and {max}"),
        )),
        Some(n) => Ok(n),
    }
}
