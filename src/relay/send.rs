// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Resilient send primitives.
//!
//! A locked wallet is unlocked once and the send retried without consuming
//! an attempt; a second lock error fails immediately. Any other error waits
//! for the retry delay and tries again, up to `max_attempts` sends in total.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::ledger::{Amount, Ledger, Outputs, RawInput, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::new(settings.max_attempts, Duration::from_millis(settings.delay_ms))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("wallet is still locked after unlocking")]
    StillLocked,

    #[error("wallet unlock failed: {0}")]
    Unlock(RpcError),

    #[error("send failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: RpcError },
}

impl SendError {
    pub fn code(&self) -> &'static str {
        match self {
            SendError::StillLocked => "SEND_STILL_LOCKED",
            SendError::Unlock(_) => "SEND_UNLOCK_FAILED",
            SendError::Exhausted { .. } => "SEND_FAILED",
        }
    }
}

async fn with_retry<F, Fut>(
    ledger: &Ledger,
    policy: RetryPolicy,
    operation: &'static str,
    mut send: F,
) -> Result<String, SendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, RpcError>>,
{
    let mut attempts = 0;
    let mut unlocked = false;

    loop {
        match send().await {
            Ok(txid) => return Ok(txid),
            Err(RpcError::WalletLocked) if !unlocked => {
                debug!(ledger = %ledger.kind(), operation, "wallet locked, unlocking");
                unlocked = true;
                ledger.unlock().await.map_err(SendError::Unlock)?;
            }
            Err(RpcError::WalletLocked) => return Err(SendError::StillLocked),
            Err(e) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(SendError::Exhausted { attempts, last: e });
                }
                warn!(
                    ledger = %ledger.kind(),
                    operation,
                    attempt = attempts,
                    error = %e,
                    "send failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

/// Send `amount` to `address`, optionally carrying encrypted metadata.
pub async fn send_to_address(
    ledger: &Ledger,
    policy: RetryPolicy,
    address: &str,
    amount: Amount,
    payload: Option<&str>,
) -> Result<String, SendError> {
    with_retry(ledger, policy, "sendtoaddress", move || {
        ledger.rpc().send_to_address(address, amount, payload)
    })
    .await
}

/// Build, sign and broadcast a raw transaction spending exactly `inputs`.
///
/// A failure at any stage restarts the chain from creation.
pub async fn send_raw_transaction(
    ledger: &Ledger,
    policy: RetryPolicy,
    inputs: &[RawInput],
    outputs: &Outputs,
    payload: Option<&str>,
) -> Result<String, SendError> {
    with_retry(ledger, policy, "sendrawtransaction", move || async move {
        let rpc = ledger.rpc();
        let unsigned = rpc.create_raw_transaction(inputs, outputs, payload).await?;
        let signed = rpc.sign_raw_transaction(&unsigned).await?;
        if !signed.complete {
            return Err(RpcError::InvalidResponse(
                "transaction signature incomplete".to_string(),
            ));
        }
        rpc.send_raw_transaction(&signed.hex).await
    })
    .await
}
