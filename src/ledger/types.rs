// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger types and the fixed-point [`Amount`].

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Minimum units per coin (1e-8 precision).
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// A ledger amount held as an integer number of minimum units.
///
/// The daemons speak floating-point coins on the wire; conversion rounds to
/// the nearest unit so every sum computed here is exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u64) -> Self {
        Amount(units)
    }

    pub const fn units(self) -> u64 {
        self.0
    }

    /// Convert a coin value, rounding to the nearest minimum unit.
    /// Negative and non-finite values clamp to zero.
    pub fn from_coins(coins: f64) -> Self {
        if !coins.is_finite() || coins <= 0.0 {
            return Amount::ZERO;
        }
        Amount((coins * UNITS_PER_COIN as f64).round() as u64)
    }

    pub fn to_coins(self) -> f64 {
        self.0 as f64 / UNITS_PER_COIN as f64
    }

    /// Whole-coin part.
    pub const fn whole(self) -> u64 {
        self.0 / UNITS_PER_COIN
    }

    /// Fractional part in minimum units.
    pub const fn fraction(self) -> u64 {
        self.0 % UNITS_PER_COIN
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    pub fn checked_mul(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.copied().sum()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.whole(), self.fraction())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_coins())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let coins = f64::deserialize(deserializer)?;
        if coins < 0.0 {
            return Err(serde::de::Error::custom("amount must not be negative"));
        }
        Ok(Amount::from_coins(coins))
    }
}

/// Which of the two ledgers a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    /// The ledger users deposit to and are paid out on.
    Primary,
    /// The ledger fragments travel across between partner servers.
    Secondary,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKind::Primary => write!(f, "primary"),
            LedgerKind::Secondary => write!(f, "secondary"),
        }
    }
}

/// An unspent output as reported by `listunspent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    /// Wallet account owning the receiving address.
    #[serde(default)]
    pub account: Option<String>,
    pub amount: Amount,
    pub confirmations: u64,
}

impl LedgerTransaction {
    pub fn input(&self) -> RawInput {
        RawInput {
            txid: self.txid.clone(),
            vout: self.vout,
        }
    }
}

/// Wallet view of a transaction (`gettransaction`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub txid: String,
    #[serde(default)]
    pub confirmations: u64,
    /// Encrypted metadata the sender attached to the transaction.
    #[serde(rename = "anon-destination", default)]
    pub anon_destination: Option<String>,
}

/// `getblockchaininfo` subset used for the sync check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    /// Blocks the node has validated.
    pub blocks: u64,
    /// Best header the node has seen.
    pub headers: u64,
}

/// `getwalletinfo` subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(default)]
    pub keypoolsize: u64,
    /// Present only for encrypted wallets.
    #[serde(default)]
    pub unlocked_until: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInput {
    pub txid: String,
    pub vout: u32,
}

/// Raw transaction outputs keyed by destination address.
pub type Outputs = BTreeMap<String, Amount>;

/// Add `amount` to `address`, merging with an existing output.
pub fn push_output(outputs: &mut Outputs, address: &str, amount: Amount) {
    *outputs.entry(address.to_string()).or_insert(Amount::ZERO) += amount;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub complete: bool,
}

/// `decoderawtransaction` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedTransaction {
    pub txid: String,
    pub vin: Vec<DecodedInput>,
    pub vout: Vec<DecodedOutput>,
}

/// Coinbase inputs carry no previous outpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInput {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedOutput {
    pub value: Amount,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub addresses: Vec<String>,
}
