// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC client for the ledger daemons.
//!
//! [`LedgerRpc`] is the seam between the relay pipeline and the wallet
//! daemons. [`JsonRpcClient`] is the production transport; the test suite
//! substitutes an in-memory mock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::types::*;

// Daemon error codes the pipeline branches on.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;
const RPC_WALLET_KEYPOOL_RAN_OUT: i64 = -12;
const RPC_WALLET_UNLOCK_NEEDED: i64 = -13;
const RPC_WALLET_WRONG_ENC_STATE: i64 = -15;
const RPC_WALLET_ALREADY_UNLOCKED: i64 = -17;

/// Default timeout for a single daemon call.
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by ledger calls.
///
/// Numeric daemon codes are translated here, once, so callers match on
/// kinds instead of magic numbers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("wallet is locked")]
    WalletLocked,

    #[error("wallet is already unlocked")]
    AlreadyUnlocked,

    #[error("wallet is not encrypted")]
    WalletUnencrypted,

    #[error("keypool ran out")]
    KeypoolRanOut,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("invalid address or key: {0}")]
    InvalidAddressOrKey(String),

    #[error("daemon error {code}: {message}")]
    Daemon { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Translate a daemon error object into an error kind.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            RPC_WALLET_UNLOCK_NEEDED => RpcError::WalletLocked,
            RPC_WALLET_ALREADY_UNLOCKED => RpcError::AlreadyUnlocked,
            RPC_WALLET_WRONG_ENC_STATE => RpcError::WalletUnencrypted,
            RPC_WALLET_KEYPOOL_RAN_OUT => RpcError::KeypoolRanOut,
            RPC_WALLET_INSUFFICIENT_FUNDS => RpcError::InsufficientFunds,
            RPC_INVALID_ADDRESS_OR_KEY => RpcError::InvalidAddressOrKey(message),
            _ => RpcError::Daemon { code, message },
        }
    }

    /// Stable code for logs and alerts.
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::WalletLocked => "RPC_WALLET_LOCKED",
            RpcError::AlreadyUnlocked => "RPC_ALREADY_UNLOCKED",
            RpcError::WalletUnencrypted => "RPC_WALLET_UNENCRYPTED",
            RpcError::KeypoolRanOut => "RPC_KEYPOOL_RAN_OUT",
            RpcError::InsufficientFunds => "RPC_INSUFFICIENT_FUNDS",
            RpcError::InvalidAddressOrKey(_) => "RPC_INVALID_ADDRESS",
            RpcError::Daemon { .. } => "RPC_DAEMON_ERROR",
            RpcError::Transport(_) => "RPC_TRANSPORT",
            RpcError::InvalidResponse(_) => "RPC_INVALID_RESPONSE",
        }
    }
}

/// Wallet and transaction primitives consumed from a ledger daemon.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn blockchain_info(&self) -> Result<BlockchainInfo, RpcError>;

    async fn wallet_info(&self) -> Result<WalletInfo, RpcError>;

    async fn wallet_passphrase(&self, passphrase: &str, timeout_secs: u64)
        -> Result<(), RpcError>;

    async fn wallet_lock(&self) -> Result<(), RpcError>;

    async fn set_tx_fee(&self, fee: Amount) -> Result<(), RpcError>;

    async fn balance(&self) -> Result<Amount, RpcError>;

    async fn list_unspent(&self, min_confirmations: u64)
        -> Result<Vec<LedgerTransaction>, RpcError>;

    async fn new_address(&self, account: &str) -> Result<String, RpcError>;

    async fn addresses_by_account(&self, account: &str) -> Result<Vec<String>, RpcError>;

    async fn validate_address(&self, address: &str) -> Result<bool, RpcError>;

    async fn transaction(&self, txid: &str) -> Result<WalletTransaction, RpcError>;

    async fn raw_transaction(&self, txid: &str) -> Result<String, RpcError>;

    async fn decode_raw_transaction(&self, hex: &str) -> Result<DecodedTransaction, RpcError>;

    async fn create_raw_transaction(
        &self,
        inputs: &[RawInput],
        outputs: &Outputs,
        payload: Option<&str>,
    ) -> Result<String, RpcError>;

    async fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, RpcError>;

    async fn send_raw_transaction(&self, hex: &str) -> Result<String, RpcError>;

    async fn send_to_address(
        &self,
        address: &str,
        amount: Amount,
        payload: Option<&str>,
    ) -> Result<String, RpcError>;

    async fn keypool_refill(&self, size: u64) -> Result<(), RpcError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ValidateAddressResult {
    isvalid: bool,
}

/// JSON-RPC 1.0 client with HTTP basic authentication.
pub struct JsonRpcClient {
    url: Url,
    user: String,
    password: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Create a client for the daemon at `url`.
    pub fn new(
        url: Url,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url,
            user: user.into(),
            password: password.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one call and decode its `result`.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::trace!(method, id, "ledger rpc call");

        // Daemons answer errors with HTTP 500 and a JSON body, so the status
        // is not checked before parsing.
        let response = self
            .http
            .post(self.url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let parsed: RpcResponse = serde_json::from_str(&text).map_err(|e| {
            RpcError::InvalidResponse(format!("{method}: HTTP {status}: {e}"))
        })?;

        if let Some(error) = parsed.error {
            return Err(RpcError::from_code(error.code, error.message));
        }

        serde_json::from_value(parsed.result)
            .map_err(|e| RpcError::InvalidResponse(format!("{method}: {e}")))
    }
}

#[async_trait]
impl LedgerRpc for JsonRpcClient {
    async fn blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
        self.call("getblockchaininfo", json!([])).await
    }

    async fn wallet_info(&self) -> Result<WalletInfo, RpcError> {
        self.call("getwalletinfo", json!([])).await
    }

    async fn wallet_passphrase(
        &self,
        passphrase: &str,
        timeout_secs: u64,
    ) -> Result<(), RpcError> {
        self.call::<Value>("walletpassphrase", json!([passphrase, timeout_secs]))
            .await
            .map(|_| ())
    }

    async fn wallet_lock(&self) -> Result<(), RpcError> {
        self.call::<Value>("walletlock", json!([])).await.map(|_| ())
    }

    async fn set_tx_fee(&self, fee: Amount) -> Result<(), RpcError> {
        self.call::<Value>("settxfee", json!([fee])).await.map(|_| ())
    }

    async fn balance(&self) -> Result<Amount, RpcError> {
        self.call("getbalance", json!([])).await
    }

    async fn list_unspent(
        &self,
        min_confirmations: u64,
    ) -> Result<Vec<LedgerTransaction>, RpcError> {
        self.call("listunspent", json!([min_confirmations])).await
    }

    async fn new_address(&self, account: &str) -> Result<String, RpcError> {
        self.call("getnewaddress", json!([account])).await
    }

    async fn addresses_by_account(&self, account: &str) -> Result<Vec<String>, RpcError> {
        self.call("getaddressesbyaccount", json!([account])).await
    }

    async fn validate_address(&self, address: &str) -> Result<bool, RpcError> {
        let result: ValidateAddressResult = self.call("validateaddress", json!([address])).await?;
        Ok(result.isvalid)
    }

    async fn transaction(&self, txid: &str) -> Result<WalletTransaction, RpcError> {
        self.call("gettransaction", json!([txid])).await
    }

    async fn raw_transaction(&self, txid: &str) -> Result<String, RpcError> {
        self.call("getrawtransaction", json!([txid])).await
    }

    async fn decode_raw_transaction(&self, hex: &str) -> Result<DecodedTransaction, RpcError> {
        self.call("decoderawtransaction", json!([hex])).await
    }

    async fn create_raw_transaction(
        &self,
        inputs: &[RawInput],
        outputs: &Outputs,
        payload: Option<&str>,
    ) -> Result<String, RpcError> {
        let params = match payload {
            Some(payload) => json!([inputs, outputs, payload]),
            None => json!([inputs, outputs]),
        };
        self.call("createrawtransaction", params).await
    }

    async fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, RpcError> {
        self.call("signrawtransaction", json!([hex])).await
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<String, RpcError> {
        self.call("sendrawtransaction", json!([hex])).await
    }

    async fn send_to_address(
        &self,
        address: &str,
        amount: Amount,
        payload: Option<&str>,
    ) -> Result<String, RpcError> {
        // The metadata slot follows the two wallet comment arguments.
        let params = match payload {
            Some(payload) => json!([address, amount, "", "", payload]),
            None => json!([address, amount]),
        };
        self.call("sendtoaddress", params).await
    }

    async fn keypool_refill(&self, size: u64) -> Result<(), RpcError> {
        self.call::<Value>("keypoolrefill", json!([size]))
            .await
            .map(|_| ())
    }
}
