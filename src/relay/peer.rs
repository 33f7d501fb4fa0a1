// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Partner selection and address retrieval.
//!
//! ## Validation steps
//!
//! A candidate outgoing server is accepted only if:
//! 1. `check-node` answers `SUCCESS` with every field, as an outgoing server
//! 2. every primary-ledger address it returned validates locally
//! 3. its public key has the expected size and a maximum-size payout
//!    encrypts to exactly the expected ciphertext length
//! 4. its addresses round-trip through our own current key, producing the
//!    holding token attached to consolidation transactions
//!
//! A rejected candidate is dropped for the rest of the cycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rsa::RsaPublicKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use super::Relay;
use crate::keys::{
    ciphertext_len, encrypt_json, key_bits, parse_public_key, HoldingPayload, KeyError,
    PayloadError, PayoutPayload,
};
use crate::ledger::RpcError;
use crate::models::{
    AddressesData, ApiResponse, CheckNodeData, CheckNodeRequest, GetAddressesRequest,
    ResponseType, ServerType,
};

/// Placeholder destination of the encryption self-test, as long as the
/// longest primary-ledger address.
const SENTINEL_ADDRESS: &str = "NW7uXr4ZAeJKigMGnKbSLfCBQY59cH1T8G";

/// Time-lock height used by the encryption self-test.
const SENTINEL_HEIGHT: u64 = 99_999_999;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer unreachable: {0}")]
    Transport(String),

    #[error("malformed peer response: {0}")]
    Malformed(String),

    #[error("peer answered {kind:?} ({code})")]
    Rejected { kind: ResponseType, code: String },

    #[error("peer response carries no data")]
    MissingData,

    #[error("peer is an {0:?} server")]
    WrongRole(ServerType),

    #[error("peer returned {got} of {wanted} addresses")]
    NotEnoughAddresses { wanted: usize, got: usize },

    #[error("peer returned invalid addresses: {0:?}")]
    InvalidAddresses(Vec<String>),

    #[error("local ledger error while validating peer: {0}")]
    Ledger(#[from] RpcError),

    #[error("peer public key unusable: {0}")]
    PublicKey(PayloadError),

    #[error("peer key is {actual} bits, expected {expected}")]
    KeySize { expected: usize, actual: usize },

    #[error("encryption self-test produced {actual} characters, expected {expected}")]
    EncryptionTest { expected: usize, actual: usize },

    #[error("holding token round trip failed: {0}")]
    HoldingToken(String),

    #[error("local key store error: {0}")]
    Keys(#[from] KeyError),

    #[error("no valid outgoing peer")]
    NoValidPeer,
}

impl PeerError {
    pub fn code(&self) -> &'static str {
        match self {
            PeerError::Transport(_) => "PEER_TRANSPORT",
            PeerError::Malformed(_) => "PEER_MALFORMED",
            PeerError::Rejected { .. } => "PEER_REJECTED",
            PeerError::MissingData => "PEER_MISSING_DATA",
            PeerError::WrongRole(_) => "PEER_WRONG_ROLE",
            PeerError::NotEnoughAddresses { .. } => "PEER_NOT_ENOUGH_ADDRESSES",
            PeerError::InvalidAddresses(_) => "PEER_INVALID_ADDRESSES",
            PeerError::Ledger(_) => "PEER_LOCAL_LEDGER",
            PeerError::PublicKey(_) => "PEER_PUBLIC_KEY",
            PeerError::KeySize { .. } => "PEER_KEY_SIZE",
            PeerError::EncryptionTest { .. } => "PEER_ENCRYPTION_TEST",
            PeerError::HoldingToken(_) => "PEER_HOLDING_TOKEN",
            PeerError::Keys(_) => "PEER_LOCAL_KEYS",
            PeerError::NoValidPeer => "PEER_NONE_VALID",
        }
    }
}

/// HTTP client for the partner protocol.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        Ok(Self { http })
    }

    async fn post<B, T>(&self, peer: &Url, path: &str, body: &B) -> Result<T, PeerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = peer
            .join(path)
            .map_err(|e| PeerError::Malformed(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| PeerError::Malformed(e.to_string()))?;

        if envelope.kind != ResponseType::Success {
            return Err(PeerError::Rejected {
                kind: envelope.kind,
                code: envelope.code.unwrap_or_default(),
            });
        }
        envelope.data.ok_or(PeerError::MissingData)
    }

    pub async fn check_node(
        &self,
        peer: &Url,
        num_addresses: usize,
    ) -> Result<CheckNodeData, PeerError> {
        let request = CheckNodeRequest {
            num_addresses: Some(num_addresses),
        };
        self.post(peer, "api/check-node", &request).await
    }

    pub async fn get_addresses(
        &self,
        peer: &Url,
        request: &GetAddressesRequest,
    ) -> Result<Vec<String>, PeerError> {
        let data: AddressesData = self.post(peer, "api/get-addresses", request).await?;
        Ok(data.addresses)
    }
}

/// A validated partner for this cycle.
#[derive(Debug, Clone)]
pub struct SelectedPeer {
    pub url: Url,
    pub node: CheckNodeData,
    pub public_key: RsaPublicKey,
    /// The peer's primary-ledger addresses sealed with our own key.
    pub holding_token: String,
}

/// Pick a random candidate until one validates.
///
/// Each candidate is tried at most once. [`PeerError::NoValidPeer`] means
/// every candidate was rejected and pending deposits should be returned.
pub async fn select_outgoing(
    relay: &Relay,
    candidates: &[Url],
    now: DateTime<Utc>,
) -> Result<SelectedPeer, PeerError> {
    let mut remaining = candidates.to_vec();

    while !remaining.is_empty() {
        let index = rand::thread_rng().gen_range(0..remaining.len());
        let url = remaining.swap_remove(index);

        match validate_peer(relay, &url, now).await {
            Ok(peer) => {
                info!(peer = %url, "outgoing peer selected");
                return Ok(peer);
            }
            // Local key store failures are not the peer's fault.
            Err(e @ PeerError::Keys(_)) => return Err(e),
            Err(e) => {
                warn!(peer = %url, code = e.code(), error = %e, "outgoing peer rejected");
            }
        }
    }

    Err(PeerError::NoValidPeer)
}

async fn validate_peer(
    relay: &Relay,
    url: &Url,
    now: DateTime<Utc>,
) -> Result<SelectedPeer, PeerError> {
    let settings = relay.settings();
    let wanted = settings.peers.num_addresses;

    let node = relay.peers().check_node(url, wanted).await?;
    if node.server_type != ServerType::Outgoing {
        return Err(PeerError::WrongRole(node.server_type));
    }
    if node.nav_addresses.len() < wanted {
        return Err(PeerError::NotEnoughAddresses {
            wanted,
            got: node.nav_addresses.len(),
        });
    }

    let invalid = relay.primary().invalid_addresses(&node.nav_addresses).await?;
    if !invalid.is_empty() {
        return Err(PeerError::InvalidAddresses(invalid));
    }

    let public_key = parse_public_key(&node.public_key).map_err(PeerError::PublicKey)?;
    encryption_self_test(&public_key, settings.peers.encryption_bits, relay)?;

    let holding_token = seal_holding_token(relay, &node.nav_addresses, now)?;

    Ok(SelectedPeer {
        url: url.clone(),
        node,
        public_key,
        holding_token,
    })
}

/// Encrypt the largest payout we could send and check the ciphertext has
/// the exact length a key of `bits` produces.
fn encryption_self_test(
    public_key: &RsaPublicKey,
    bits: usize,
    relay: &Relay,
) -> Result<(), PeerError> {
    let actual_bits = key_bits(public_key);
    if actual_bits != bits {
        return Err(PeerError::KeySize {
            expected: bits,
            actual: actual_bits,
        });
    }

    let sentinel = PayoutPayload {
        n: SENTINEL_ADDRESS.to_string(),
        v: relay.settings().max_amount,
        s: relay.settings().shared_secret.clone(),
        t: Some(SENTINEL_HEIGHT),
    };
    let expected = ciphertext_len(bits);
    let ciphertext = encrypt_json(public_key, &sentinel).map_err(PeerError::PublicKey)?;
    if ciphertext.len() != expected {
        return Err(PeerError::EncryptionTest {
            expected,
            actual: ciphertext.len(),
        });
    }
    Ok(())
}

fn seal_holding_token(
    relay: &Relay,
    addresses: &[String],
    now: DateTime<Utc>,
) -> Result<String, PeerError> {
    let own_key = relay.keys().current_public_key(now)?;
    let payload = HoldingPayload {
        n: addresses.to_vec(),
    };
    let token = encrypt_json(&own_key, &payload)
        .map_err(|e| PeerError::HoldingToken(e.to_string()))?;

    let opened: HoldingPayload = relay
        .keys()
        .key_ring()?
        .decrypt(&token)
        .map_err(|e| PeerError::HoldingToken(e.to_string()))?;
    if opened != payload {
        return Err(PeerError::HoldingToken(
            "decrypted addresses differ".to_string(),
        ));
    }
    Ok(token)
}

/// Ask the peer for `count` secondary-ledger addresses and validate each
/// on the local secondary ledger.
pub async fn retrieve_subchain_addresses(
    relay: &Relay,
    peer: &SelectedPeer,
    count: usize,
) -> Result<Vec<String>, PeerError> {
    let request = GetAddressesRequest::new(count, relay.settings().peers.secondary_account.clone());
    let mut addresses = relay.peers().get_addresses(&peer.url, &request).await?;
    if addresses.len() < count {
        return Err(PeerError::NotEnoughAddresses {
            wanted: count,
            got: addresses.len(),
        });
    }
    addresses.truncate(count);

    let invalid = relay.secondary().invalid_addresses(&addresses).await?;
    if !invalid.is_empty() {
        return Err(PeerError::InvalidAddresses(invalid));
    }
    Ok(addresses)
}
