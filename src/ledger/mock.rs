// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory [`LedgerRpc`] for unit tests.
//!
//! Behaves like a small wallet daemon: tracks lock state, keypool, unspent
//! outputs and broadcasts, and lets a test script failures per method.
//! Calls are counted under their daemon method names.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::client::{LedgerRpc, RpcError};
use super::types::*;

#[derive(Debug, Clone, PartialEq)]
pub struct SentPayment {
    pub address: String,
    pub amount: Amount,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSend {
    pub inputs: Vec<RawInput>,
    pub outputs: Outputs,
    pub payload: Option<String>,
}

#[derive(Default)]
struct MockState {
    info: Option<BlockchainInfo>,
    encrypted: bool,
    locked: bool,
    keypool: u64,
    balance: Amount,
    tx_fee: Option<Amount>,
    unspent: Vec<LedgerTransaction>,
    wallet_txs: HashMap<String, WalletTransaction>,
    decoded: HashMap<String, DecodedTransaction>,
    accounts: HashMap<String, Vec<String>>,
    created: HashMap<String, RawSend>,
    scripted: HashMap<&'static str, VecDeque<RpcError>>,
    always: HashMap<&'static str, RpcError>,
    after: HashMap<&'static str, (usize, RpcError)>,
    stalls: HashMap<&'static str, Duration>,
    calls: HashMap<&'static str, usize>,
    sent: Vec<SentPayment>,
    raw_sent: Vec<RawSend>,
    counter: u64,
}

pub struct MockLedger {
    state: Mutex<MockState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                info: Some(BlockchainInfo {
                    blocks: 1_000,
                    headers: 1_000,
                }),
                keypool: 1_000,
                balance: Amount::from_coins(10_000.0),
                ..MockState::default()
            }),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// Encrypted wallet, initially locked.
    pub fn encrypted(self) -> Self {
        self.with_state(|s| {
            s.encrypted = true;
            s.locked = true;
        })
    }

    pub fn keypool(self, size: u64) -> Self {
        self.with_state(|s| s.keypool = size)
    }

    pub fn heights(self, blocks: u64, headers: u64) -> Self {
        self.with_state(|s| s.info = Some(BlockchainInfo { blocks, headers }))
    }

    pub fn balance(self, coins: f64) -> Self {
        self.with_state(|s| s.balance = Amount::from_coins(coins))
    }

    pub fn unspent(self, txs: Vec<LedgerTransaction>) -> Self {
        self.with_state(|s| s.unspent.extend(txs))
    }

    /// Attach encrypted metadata to a wallet transaction.
    pub fn payload(self, txid: &str, payload: &str) -> Self {
        self.with_state(|s| {
            s.wallet_txs.insert(
                txid.to_string(),
                WalletTransaction {
                    txid: txid.to_string(),
                    confirmations: 1,
                    anon_destination: Some(payload.to_string()),
                },
            );
        })
    }

    /// Record that output 0 of `txid` was funded by `address` through
    /// output `prev_vout` of `prev_txid`.
    pub fn origin(self, txid: &str, prev_txid: &str, prev_vout: u32, address: &str) -> Self {
        self.with_state(|s| {
            s.decoded.insert(
                txid.to_string(),
                DecodedTransaction {
                    txid: txid.to_string(),
                    vin: vec![DecodedInput {
                        txid: Some(prev_txid.to_string()),
                        vout: Some(prev_vout),
                    }],
                    vout: vec![],
                },
            );
            let mut vout: Vec<DecodedOutput> = (0..prev_vout)
                .map(|n| DecodedOutput {
                    value: Amount::from_coins(1.0),
                    n,
                    script_pub_key: ScriptPubKey {
                        addresses: vec![format!("Nunrelated{n}")],
                    },
                })
                .collect();
            vout.push(DecodedOutput {
                value: Amount::from_coins(1.0),
                n: prev_vout,
                script_pub_key: ScriptPubKey {
                    addresses: vec![address.to_string()],
                },
            });
            s.decoded.insert(
                prev_txid.to_string(),
                DecodedTransaction {
                    txid: prev_txid.to_string(),
                    vin: vec![],
                    vout,
                },
            );
        })
    }

    pub fn account_addresses(self, account: &str, addresses: Vec<String>) -> Self {
        self.with_state(|s| {
            s.accounts.insert(account.to_string(), addresses);
        })
    }

    /// Fail the next call of `method` with `error`.
    pub fn fail_once(self, method: &'static str, error: RpcError) -> Self {
        self.with_state(|s| s.scripted.entry(method).or_default().push_back(error))
    }

    /// Fail every call of `method` with `error`.
    pub fn fail_always(self, method: &'static str, error: RpcError) -> Self {
        self.with_state(|s| {
            s.always.insert(method, error);
        })
    }

    /// Let `successes` calls of `method` through, then fail every later one.
    pub fn fail_after(self, method: &'static str, successes: usize, error: RpcError) -> Self {
        self.with_state(|s| {
            s.after.insert(method, (successes, error));
        })
    }

    /// Hold every `getblockchaininfo` answer back for `delay`.
    pub fn stall_chain_info(self, delay: Duration) -> Self {
        self.with_state(|s| {
            s.stalls.insert("getblockchaininfo", delay);
        })
    }

    pub fn set_heights(&self, blocks: u64, headers: u64) {
        self.state.lock().unwrap().info = Some(BlockchainInfo { blocks, headers });
    }

    pub fn stop_failing(&self, method: &'static str) {
        let mut s = self.state.lock().unwrap();
        s.always.remove(method);
        s.scripted.remove(method);
        s.after.remove(method);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<SentPayment> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn raw_sent(&self) -> Vec<RawSend> {
        self.state.lock().unwrap().raw_sent.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().locked
    }

    pub fn tx_fee(&self) -> Option<Amount> {
        self.state.lock().unwrap().tx_fee
    }

    pub fn remaining_unspent(&self) -> Vec<LedgerTransaction> {
        self.state.lock().unwrap().unspent.clone()
    }

    /// Count the call and pop any scripted failure.
    fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, MockState>, RpcError> {
        let mut s = self.state.lock().unwrap();
        let calls = s.calls.entry(method).or_insert(0);
        *calls += 1;
        let calls = *calls;
        if let Some(error) = s.scripted.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if let Some((successes, error)) = s.after.get(method) {
            if calls > *successes {
                return Err(error.clone());
            }
        }
        if let Some(error) = s.always.get(method) {
            return Err(error.clone());
        }
        Ok(s)
    }

    fn next_id(s: &mut MockState, prefix: &str) -> String {
        s.counter += 1;
        format!("{prefix}{}", s.counter)
    }
}

fn ensure_unlocked(s: &MockState) -> Result<(), RpcError> {
    if s.encrypted && s.locked {
        Err(RpcError::WalletLocked)
    } else {
        Ok(())
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
        let stall = self.state.lock().unwrap().stalls.get("getblockchaininfo").copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let s = self.enter("getblockchaininfo")?;
        s.info
            .ok_or_else(|| RpcError::InvalidResponse("no chain info".to_string()))
    }

    async fn wallet_info(&self) -> Result<WalletInfo, RpcError> {
        let s = self.enter("getwalletinfo")?;
        Ok(WalletInfo {
            keypoolsize: s.keypool,
            unlocked_until: s.encrypted.then_some(0),
        })
    }

    async fn wallet_passphrase(&self, _passphrase: &str, _timeout: u64) -> Result<(), RpcError> {
        let mut s = self.enter("walletpassphrase")?;
        if !s.encrypted {
            return Err(RpcError::WalletUnencrypted);
        }
        if !s.locked {
            return Err(RpcError::AlreadyUnlocked);
        }
        s.locked = false;
        Ok(())
    }

    async fn wallet_lock(&self) -> Result<(), RpcError> {
        let mut s = self.enter("walletlock")?;
        if !s.encrypted {
            return Err(RpcError::WalletUnencrypted);
        }
        s.locked = true;
        Ok(())
    }

    async fn set_tx_fee(&self, fee: Amount) -> Result<(), RpcError> {
        let mut s = self.enter("settxfee")?;
        s.tx_fee = Some(fee);
        Ok(())
    }

    async fn balance(&self) -> Result<Amount, RpcError> {
        let s = self.enter("getbalance")?;
        Ok(s.balance)
    }

    async fn list_unspent(&self, min_confirmations: u64) -> Result<Vec<LedgerTransaction>, RpcError> {
        let s = self.enter("listunspent")?;
        Ok(s.unspent
            .iter()
            .filter(|tx| tx.confirmations >= min_confirmations)
            .cloned()
            .collect())
    }

    async fn new_address(&self, account: &str) -> Result<String, RpcError> {
        let mut s = self.enter("getnewaddress")?;
        if s.keypool == 0 {
            return Err(RpcError::KeypoolRanOut);
        }
        s.keypool -= 1;
        let address = Self::next_id(&mut s, &format!("N{account}"));
        s.accounts
            .entry(account.to_string())
            .or_default()
            .push(address.clone());
        Ok(address)
    }

    async fn addresses_by_account(&self, account: &str) -> Result<Vec<String>, RpcError> {
        let s = self.enter("getaddressesbyaccount")?;
        Ok(s.accounts.get(account).cloned().unwrap_or_default())
    }

    async fn validate_address(&self, address: &str) -> Result<bool, RpcError> {
        let _s = self.enter("validateaddress")?;
        Ok(!address.is_empty() && !address.starts_with("bad"))
    }

    async fn transaction(&self, txid: &str) -> Result<WalletTransaction, RpcError> {
        let s = self.enter("gettransaction")?;
        s.wallet_txs
            .get(txid)
            .cloned()
            .ok_or_else(|| RpcError::InvalidAddressOrKey(format!("unknown transaction {txid}")))
    }

    async fn raw_transaction(&self, txid: &str) -> Result<String, RpcError> {
        let s = self.enter("getrawtransaction")?;
        if s.decoded.contains_key(txid) {
            Ok(format!("raw:{txid}"))
        } else {
            Err(RpcError::InvalidAddressOrKey(format!("unknown transaction {txid}")))
        }
    }

    async fn decode_raw_transaction(&self, hex: &str) -> Result<DecodedTransaction, RpcError> {
        let s = self.enter("decoderawtransaction")?;
        hex.strip_prefix("raw:")
            .and_then(|txid| s.decoded.get(txid))
            .cloned()
            .ok_or_else(|| RpcError::Daemon {
                code: -22,
                message: "TX decode failed".to_string(),
            })
    }

    async fn create_raw_transaction(
        &self,
        inputs: &[RawInput],
        outputs: &Outputs,
        payload: Option<&str>,
    ) -> Result<String, RpcError> {
        let mut s = self.enter("createrawtransaction")?;
        let hex = Self::next_id(&mut s, "unsigned:");
        s.created.insert(
            hex.clone(),
            RawSend {
                inputs: inputs.to_vec(),
                outputs: outputs.clone(),
                payload: payload.map(str::to_string),
            },
        );
        Ok(hex)
    }

    async fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction, RpcError> {
        let s = self.enter("signrawtransaction")?;
        ensure_unlocked(&s)?;
        let id = hex
            .strip_prefix("unsigned:")
            .ok_or_else(|| RpcError::Daemon {
                code: -22,
                message: "TX decode failed".to_string(),
            })?;
        Ok(SignedTransaction {
            hex: format!("signed:{id}"),
            complete: true,
        })
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<String, RpcError> {
        let mut s = self.enter("sendrawtransaction")?;
        let id = hex.strip_prefix("signed:").ok_or_else(|| RpcError::Daemon {
            code: -22,
            message: "TX decode failed".to_string(),
        })?;
        let raw = s
            .created
            .remove(&format!("unsigned:{id}"))
            .ok_or_else(|| RpcError::Daemon {
                code: -25,
                message: "Missing inputs".to_string(),
            })?;
        s.unspent.retain(|tx| {
            !raw
                .inputs
                .iter()
                .any(|input| input.txid == tx.txid && input.vout == tx.vout)
        });
        s.raw_sent.push(raw);
        Ok(format!("rawtx{id}"))
    }

    async fn send_to_address(
        &self,
        address: &str,
        amount: Amount,
        payload: Option<&str>,
    ) -> Result<String, RpcError> {
        let mut s = self.enter("sendtoaddress")?;
        ensure_unlocked(&s)?;
        if amount > s.balance {
            return Err(RpcError::InsufficientFunds);
        }
        s.balance = s.balance.saturating_sub(amount);
        s.sent.push(SentPayment {
            address: address.to_string(),
            amount,
            payload: payload.map(str::to_string),
        });
        Ok(Self::next_id(&mut s, "tx"))
    }

    async fn keypool_refill(&self, size: u64) -> Result<(), RpcError> {
        let mut s = self.enter("keypoolrefill")?;
        s.keypool = s.keypool.max(size);
        Ok(())
    }
}
