// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Process-level settings come from the environment; everything describing
//! the relay itself (role, ledgers, peers, limits) comes from a JSON file.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `NAVRELAY_CONFIG` | Path of the JSON settings file | `config/settings.json` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `3000` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,navrelay=debug,tower_http=info` |

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::keys::paths::{
    DEFAULT_PRIVATE_DIR, DEFAULT_PRIVATE_SUFFIX, DEFAULT_PUBLIC_DIR, DEFAULT_PUBLIC_SUFFIX,
};
use crate::keys::{max_plaintext_len, HoldingPayload, KeyPaths, PayoutPayload, ADDRESS_LEN};
use crate::ledger::Amount;

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "NAVRELAY_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.json";

pub const HOST_ENV: &str = "HOST";

pub const PORT_ENV: &str = "PORT";

pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 3000;

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,navrelay=debug,tower_http=info";

/// Largest address batch a peer may request, bounded by what fits in one
/// encrypted holding token.
pub const MAX_PEER_ADDRESSES: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "CONFIG_IO",
            ConfigError::Parse(_) => "CONFIG_PARSE",
            ConfigError::Invalid { .. } => "CONFIG_INVALID",
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Which half of the relay this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts deposits and forwards fragments to a partner.
    Incoming,
    /// Reassembles payouts and releases funds.
    Outgoing,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Incoming => write!(f, "incoming"),
            Role::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// Connection and wallet settings for one ledger daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    pub rpc_url: Url,
    pub rpc_user: String,
    pub rpc_password: String,
    /// Omit for unencrypted wallets.
    #[serde(default)]
    pub wallet_passphrase: Option<String>,
    #[serde(default = "default_unlock_timeout")]
    pub unlock_timeout_secs: u64,
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_holding_account")]
    pub holding_account: String,
    #[serde(default = "default_tx_fee")]
    pub tx_fee: Amount,
    #[serde(default = "default_sync_threshold")]
    pub sync_threshold_blocks: u64,
}

/// Retry behaviour for sends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStoreSettings {
    #[serde(default = "default_private_dir")]
    pub private_dir: PathBuf,
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    #[serde(default = "default_private_suffix")]
    pub private_suffix: String,
    #[serde(default = "default_public_suffix")]
    pub public_suffix: String,
    /// Days a keypair stays valid for decryption.
    #[serde(default = "default_key_period")]
    pub key_period_days: i64,
    #[serde(default = "default_encryption_bits")]
    pub encryption_bits: usize,
}

impl Default for KeyStoreSettings {
    fn default() -> Self {
        Self {
            private_dir: default_private_dir(),
            public_dir: default_public_dir(),
            private_suffix: default_private_suffix(),
            public_suffix: default_public_suffix(),
            key_period_days: default_key_period(),
            encryption_bits: default_encryption_bits(),
        }
    }
}

impl KeyStoreSettings {
    pub fn paths(&self) -> KeyPaths {
        KeyPaths::new(
            &self.private_dir,
            &self.public_dir,
            self.private_suffix.clone(),
            self.public_suffix.clone(),
        )
    }
}

/// Partner servers and how to talk to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSettings {
    /// Base URLs of candidate outgoing servers.
    #[serde(default)]
    pub urls: Vec<Url>,
    #[serde(default = "default_peer_timeout")]
    pub timeout_secs: u64,
    /// Primary-ledger addresses requested from the peer.
    #[serde(default = "default_peer_addresses")]
    pub num_addresses: usize,
    /// Expected modulus size of the peer's public key.
    #[serde(default = "default_encryption_bits")]
    pub encryption_bits: usize,
    /// Secondary-ledger account the peer hands addresses out of.
    #[serde(default = "default_account")]
    pub secondary_account: String,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            timeout_secs: default_peer_timeout(),
            num_addresses: default_peer_addresses(),
            encryption_bits: default_encryption_bits(),
            secondary_account: default_account(),
        }
    }
}

/// Relay settings loaded from the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub role: Role,
    pub primary: LedgerSettings,
    pub secondary: LedgerSettings,
    /// Secret shared with partner servers, embedded in every payout.
    pub shared_secret: String,
    #[serde(default)]
    pub peers: PeerSettings,
    #[serde(default)]
    pub keys: KeyStoreSettings,
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_min_amount")]
    pub min_amount: Amount,
    #[serde(default = "default_max_amount")]
    pub max_amount: Amount,
    /// Service fee in percent, deducted before flattening.
    #[serde(default)]
    pub transaction_fee: f64,
    /// Value sent with each secondary-ledger fragment.
    #[serde(default = "default_secondary_tx_cost")]
    pub secondary_tx_cost: Amount,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,
    /// Confirmations after which fragments of an incomplete group are returned.
    #[serde(default = "default_stale_confirmations")]
    pub stale_confirmations: u64,
    /// Ceiling on fragments (incoming) or payouts (outgoing) per cycle.
    #[serde(default = "default_max_fragments")]
    pub max_fragments_per_cycle: usize,
    /// Seconds per primary-ledger block, converts time delays to heights.
    #[serde(default = "default_block_interval")]
    pub block_interval_secs: u64,
    #[serde(default = "default_holding_min")]
    pub holding_fragments_min: usize,
    #[serde(default = "default_holding_max")]
    pub holding_fragments_max: usize,
    #[serde(default = "default_keypool_min")]
    pub keypool_min: u64,
    #[serde(default = "default_max_addresses")]
    pub max_addresses_per_request: usize,
    #[serde(default = "default_pick_attempts")]
    pub address_pick_attempts: usize,

    /// Public host name reported to peers.
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_public_port")]
    pub server_port: u16,
    /// Build fingerprint reported to peers.
    #[serde(default)]
    pub md5: String,

    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

impl Settings {
    /// Load from `NAVRELAY_CONFIG`, falling back to the default path.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Every payload we seal must fit one RSA block of the configured size.
    fn check_payloads_fit(&self) -> Result<(), ConfigError> {
        let address = "N".repeat(ADDRESS_LEN);
        let holding = HoldingPayload {
            n: vec![address.clone(); self.peers.num_addresses],
        };
        fits_key("keys.encryption_bits", &holding, self.keys.encryption_bits)?;

        let payout = PayoutPayload {
            n: address,
            v: self.max_amount,
            s: self.shared_secret.clone(),
            t: Some(u64::from(u32::MAX)),
        };
        fits_key("peers.encryption_bits", &payout, self.peers.encryption_bits)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_interval_secs == 0 {
            return Err(ConfigError::invalid("cycle_interval_secs", "must be positive"));
        }
        if self.block_interval_secs == 0 {
            return Err(ConfigError::invalid("block_interval_secs", "must be positive"));
        }
        if self.peers.timeout_secs == 0 {
            return Err(ConfigError::invalid("peers.timeout_secs", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be positive"));
        }
        if self.shared_secret.trim().is_empty() {
            return Err(ConfigError::invalid("shared_secret", "must not be empty"));
        }
        if self.keys.key_period_days < 1 {
            return Err(ConfigError::invalid("keys.key_period_days", "must be at least 1"));
        }
        if self.keys.encryption_bits < 1024 || self.peers.encryption_bits < 1024 {
            return Err(ConfigError::invalid(
                "encryption_bits",
                "keys must be at least 1024 bits",
            ));
        }
        if self.holding_fragments_min == 0 || self.holding_fragments_min > self.holding_fragments_max
        {
            return Err(ConfigError::invalid(
                "holding_fragments_min",
                format!(
                    "range {}..={} is empty",
                    self.holding_fragments_min, self.holding_fragments_max
                ),
            ));
        }
        if self.min_amount > self.max_amount {
            return Err(ConfigError::invalid("min_amount", "exceeds max_amount"));
        }
        if !(0.0..100.0).contains(&self.transaction_fee) {
            return Err(ConfigError::invalid("transaction_fee", "must be in 0..100"));
        }
        // Fragments must be refundable on the secondary ledger.
        if self.secondary_tx_cost <= self.secondary.tx_fee {
            return Err(ConfigError::invalid(
                "secondary_tx_cost",
                "must exceed the secondary ledger fee",
            ));
        }
        if self.max_fragments_per_cycle == 0 {
            return Err(ConfigError::invalid("max_fragments_per_cycle", "must be positive"));
        }
        if !(1..=MAX_PEER_ADDRESSES).contains(&self.peers.num_addresses) {
            return Err(ConfigError::invalid(
                "peers.num_addresses",
                format!("must be between 1 and {MAX_PEER_ADDRESSES}"),
            ));
        }
        self.check_payloads_fit()?;
        if self.max_addresses_per_request == 0 {
            return Err(ConfigError::invalid("max_addresses_per_request", "must be positive"));
        }
        for (field, ledger) in [("primary", &self.primary), ("secondary", &self.secondary)] {
            if !matches!(ledger.rpc_url.scheme(), "http" | "https") {
                return Err(ConfigError::invalid(field, "rpc_url must be http(s)"));
            }
            if ledger.account.is_empty() {
                return Err(ConfigError::invalid(field, "account must not be empty"));
            }
        }
        if self.peers.urls.iter().any(|u| u.cannot_be_a_base()) {
            return Err(ConfigError::invalid("peers.urls", "peer URLs must be base URLs"));
        }
        if self.role == Role::Incoming && self.peers.urls.is_empty() {
            return Err(ConfigError::invalid(
                "peers.urls",
                "the incoming role needs at least one outgoing peer",
            ));
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err(ConfigError::invalid(
                "tls_cert_path",
                "certificate and key must be set together",
            ));
        }
        Ok(())
    }
}

fn default_unlock_timeout() -> u64 {
    60
}

fn default_account() -> String {
    "navrelay".to_string()
}

fn default_holding_account() -> String {
    "holding".to_string()
}

fn default_tx_fee() -> Amount {
    Amount::from_coins(0.0001)
}

fn default_sync_threshold() -> u64 {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_private_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PRIVATE_DIR)
}

fn default_public_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PUBLIC_DIR)
}

fn default_private_suffix() -> String {
    DEFAULT_PRIVATE_SUFFIX.to_string()
}

fn default_public_suffix() -> String {
    DEFAULT_PUBLIC_SUFFIX.to_string()
}

fn default_key_period() -> i64 {
    2
}

fn default_encryption_bits() -> usize {
    2048
}

fn default_peer_timeout() -> u64 {
    10
}

fn fits_key<T: Serialize>(field: &'static str, payload: &T, bits: usize) -> Result<(), ConfigError> {
    let needed = serde_json::to_vec(payload)?.len();
    let limit = max_plaintext_len(bits);
    if needed > limit {
        return Err(ConfigError::invalid(
            field,
            format!("{bits}-bit keys seal at most {limit} bytes, payloads need {needed}"),
        ));
    }
    Ok(())
}

fn default_peer_addresses() -> usize {
    4
}

fn default_cycle_interval() -> u64 {
    60
}

fn default_min_amount() -> Amount {
    Amount::from_coins(10.0)
}

fn default_max_amount() -> Amount {
    Amount::from_coins(10_000.0)
}

fn default_secondary_tx_cost() -> Amount {
    Amount::from_coins(0.001)
}

fn default_min_confirmations() -> u64 {
    1
}

fn default_stale_confirmations() -> u64 {
    120
}

fn default_max_fragments() -> usize {
    50
}

fn default_block_interval() -> u64 {
    30
}

fn default_holding_min() -> usize {
    2
}

fn default_holding_max() -> usize {
    5
}

fn default_keypool_min() -> u64 {
    100
}

fn default_max_addresses() -> usize {
    100
}

fn default_pick_attempts() -> usize {
    1_000
}

fn default_public_port() -> u16 {
    DEFAULT_PORT
}
