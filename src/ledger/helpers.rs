// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet helpers shared by every pipeline stage.

use tracing::{debug, info, warn};

use super::client::RpcError;
use super::types::{BlockchainInfo, LedgerTransaction};
use super::Ledger;

/// Keys added to the pool when it runs dry during address generation.
const EMERGENCY_REFILL_SIZE: u64 = 100;

/// Block height snapshot used by the sync check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub blocks: u64,
    pub headers: u64,
}

impl SyncStatus {
    pub fn lag(&self) -> u64 {
        self.headers.abs_diff(self.blocks)
    }

    pub fn is_within(&self, threshold: u64) -> bool {
        self.lag() <= threshold
    }
}

impl From<BlockchainInfo> for SyncStatus {
    fn from(info: BlockchainInfo) -> Self {
        Self {
            blocks: info.blocks,
            headers: info.headers,
        }
    }
}

/// Keep only unspent outputs received by `account`.
pub fn filter_by_account(unspent: Vec<LedgerTransaction>, account: &str) -> Vec<LedgerTransaction> {
    unspent
        .into_iter()
        .filter(|tx| tx.account.as_deref() == Some(account))
        .collect()
}

impl Ledger {
    /// Unlock the wallet. Unencrypted and already-unlocked wallets succeed.
    pub async fn unlock(&self) -> Result<(), RpcError> {
        let Some(passphrase) = self.passphrase.as_deref() else {
            return Ok(());
        };

        match self
            .rpc()
            .wallet_passphrase(passphrase, self.unlock_timeout_secs)
            .await
        {
            Ok(()) => {
                debug!(ledger = %self.kind(), "wallet unlocked");
                Ok(())
            }
            Err(RpcError::AlreadyUnlocked) | Err(RpcError::WalletUnencrypted) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Lock the wallet again. A no-op for unencrypted wallets.
    pub async fn lock(&self) -> Result<(), RpcError> {
        if self.passphrase.is_none() {
            return Ok(());
        }

        match self.rpc().wallet_lock().await {
            Ok(()) | Err(RpcError::WalletUnencrypted) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, RpcError> {
        self.rpc().blockchain_info().await.map(SyncStatus::from)
    }

    /// Unspent outputs held by the service account.
    pub async fn service_unspent(
        &self,
        min_confirmations: u64,
    ) -> Result<Vec<LedgerTransaction>, RpcError> {
        let unspent = self.rpc().list_unspent(min_confirmations).await?;
        Ok(filter_by_account(unspent, self.account()))
    }

    /// Validate every address, returning the ones the daemon rejects.
    pub async fn invalid_addresses(&self, addresses: &[String]) -> Result<Vec<String>, RpcError> {
        let mut invalid = Vec::new();
        for address in addresses {
            if !self.rpc().validate_address(address).await? {
                invalid.push(address.clone());
            }
        }
        Ok(invalid)
    }

    /// Generate an address in `account`, refilling the keypool once if it
    /// has run dry.
    pub async fn fresh_address(&self, account: &str) -> Result<String, RpcError> {
        match self.rpc().new_address(account).await {
            Err(RpcError::KeypoolRanOut) => {
                warn!(ledger = %self.kind(), "keypool ran out, refilling");
                self.unlock().await?;
                self.rpc().keypool_refill(EMERGENCY_REFILL_SIZE).await?;
                self.rpc().new_address(account).await
            }
            other => other,
        }
    }

    /// Top up the keypool when it drops below `minimum`.
    ///
    /// Returns whether a refill was issued.
    pub async fn refill_keypool(&self, minimum: u64) -> Result<bool, RpcError> {
        let info = self.rpc().wallet_info().await?;
        if info.keypoolsize >= minimum {
            return Ok(false);
        }

        info!(
            ledger = %self.kind(),
            keypool = info.keypoolsize,
            minimum,
            "refilling keypool"
        );
        self.rpc().keypool_refill(minimum).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::mock::MockLedger;
    use crate::ledger::{Amount, LedgerKind};

    fn tx(txid: &str, account: Option<&str>) -> LedgerTransaction {
        LedgerTransaction {
            txid: txid.to_string(),
            vout: 0,
            address: "Naddr".to_string(),
            account: account.map(str::to_string),
            amount: Amount::from_coins(1.0),
            confirmations: 3,
        }
    }

    #[test]
    fn filter_keeps_only_matching_account() {
        let filtered = filter_by_account(
            vec![tx("a", Some("service")), tx("b", Some("other")), tx("c", None)],
            "service",
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].txid, "a");
    }

    #[test]
    fn sync_lag_is_symmetric() {
        let status = SyncStatus {
            blocks: 100,
            headers: 95,
        };
        assert_eq!(status.lag(), 5);
        assert!(status.is_within(5));
        assert!(!status.is_within(4));
    }

    #[tokio::test]
    async fn unlock_is_noop_without_passphrase() {
        let mock = Arc::new(MockLedger::new().encrypted());
        let ledger = Ledger::new(LedgerKind::Primary, mock.clone(), "service");
        ledger.unlock().await.unwrap();
        assert_eq!(mock.calls("walletpassphrase"), 0);
    }

    #[tokio::test]
    async fn unlock_treats_already_unlocked_as_success() {
        let mock = Arc::new(MockLedger::new().encrypted());
        let ledger = Ledger::new(LedgerKind::Primary, mock.clone(), "service")
            .with_passphrase(Some("secret".to_string()), 30);

        ledger.unlock().await.unwrap();
        ledger.unlock().await.unwrap();
        assert_eq!(mock.calls("walletpassphrase"), 2);
        assert!(!mock.is_locked());
    }

    #[tokio::test]
    async fn unlock_accepts_unencrypted_wallet() {
        let mock = Arc::new(MockLedger::new());
        let ledger = Ledger::new(LedgerKind::Primary, mock, "service")
            .with_passphrase(Some("secret".to_string()), 30);
        ledger.unlock().await.unwrap();
        ledger.lock().await.unwrap();
    }

    #[tokio::test]
    async fn fresh_address_refills_an_empty_keypool() {
        let mock = Arc::new(MockLedger::new().keypool(0));
        let ledger = Ledger::new(LedgerKind::Secondary, mock.clone(), "service");

        let address = ledger.fresh_address("service").await.unwrap();
        assert!(!address.is_empty());
        assert_eq!(mock.calls("keypoolrefill"), 1);
    }

    #[tokio::test]
    async fn refill_only_below_minimum() {
        let mock = Arc::new(MockLedger::new().keypool(500));
        let ledger = Ledger::new(LedgerKind::Primary, mock.clone(), "service");
        assert!(!ledger.refill_keypool(100).await.unwrap());

        let mock = Arc::new(MockLedger::new().keypool(10));
        let ledger = Ledger::new(LedgerKind::Primary, mock.clone(), "service");
        assert!(ledger.refill_keypool(100).await.unwrap());
        assert_eq!(mock.calls("keypoolrefill"), 1);
    }

    #[tokio::test]
    async fn invalid_addresses_are_reported() {
        let mock = Arc::new(MockLedger::new());
        let ledger = Ledger::new(LedgerKind::Primary, mock, "service");
        let invalid = ledger
            .invalid_addresses(&["Ngood".to_string(), "bad-1".to_string()])
            .await
            .unwrap();
        assert_eq!(invalid, vec!["bad-1".to_string()]);
    }
}
