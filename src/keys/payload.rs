// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted transaction metadata.
//!
//! Payloads are JSON documents encrypted with RSA (PKCS#1 v1.5) and carried
//! base64-encoded in a transaction's metadata field. Two shapes exist:
//!
//! | Shape | Written by | Fields |
//! |-------|-----------|--------|
//! | [`FragmentPayload`] | depositor's wallet | `n` destination, `t` delay, `p` part, `o` parts, `u` correlation id |
//! | [`PayoutPayload`] | incoming server | `n` destination, `v` amount, `s` shared secret, `t` time-lock |
//!
//! Decryption walks a [`KeyRing`] oldest key first, so payloads encrypted
//! with yesterday's key still open during the rotation overlap.

use base64ct::{Base64, Encoding};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::Amount;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid base64")]
    Encoding,

    #[error("no private key could decrypt the payload")]
    NoMatchingKey,

    #[error("payload is missing required fields: {0}")]
    MissingFields(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

impl PayloadError {
    pub fn code(&self) -> &'static str {
        match self {
            PayloadError::Encoding => "PAYLOAD_ENCODING",
            PayloadError::NoMatchingKey => "PAYLOAD_NO_KEY",
            PayloadError::MissingFields(_) => "PAYLOAD_FIELDS",
            PayloadError::Encrypt(_) => "PAYLOAD_ENCRYPT",
            PayloadError::InvalidPublicKey(_) => "PAYLOAD_PUBLIC_KEY",
            PayloadError::Serialize(_) => "PAYLOAD_SERIALIZE",
        }
    }
}

/// Fragment metadata attached by the depositor to each part of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentPayload {
    /// Final destination on the primary ledger.
    pub n: String,
    /// Maximum release delay in seconds.
    #[serde(default)]
    pub t: u64,
    /// Part index, 1-based.
    pub p: u32,
    /// Total number of parts.
    pub o: u32,
    /// Correlation id shared by all parts.
    pub u: String,
}

/// Payout instruction sent from the incoming to the outgoing server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutPayload {
    /// Final destination on the primary ledger.
    pub n: String,
    /// Amount to release.
    pub v: Amount,
    /// Shared secret proving the instruction came from a partner.
    pub s: String,
    /// Primary-ledger block height before which the payout must not be sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<u64>,
}

/// Holding token: the partner's addresses sealed with our own key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingPayload {
    pub n: Vec<String>,
}

/// Private keys able to open incoming payloads, oldest first.
#[derive(Clone, Default)]
pub struct KeyRing {
    keys: Vec<(i64, RsaPrivateKey)>,
}

impl KeyRing {
    pub fn new(mut keys: Vec<(i64, RsaPrivateKey)>) -> Self {
        keys.sort_by_key(|(stamp, _)| *stamp);
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Decrypt with the first key that yields valid JSON.
    pub fn decrypt_value(&self, ciphertext: &str) -> Result<Value, PayloadError> {
        let bytes = decode_ciphertext(ciphertext)?;
        for (_, key) in &self.keys {
            let Ok(plaintext) = key.decrypt(Pkcs1v15Encrypt, &bytes) else {
                continue;
            };
            if let Ok(value) = serde_json::from_slice::<Value>(&plaintext) {
                return Ok(value);
            }
        }
        Err(PayloadError::NoMatchingKey)
    }

    /// Decrypt and check the document has the fields of `T`.
    pub fn decrypt<T: DeserializeOwned>(&self, ciphertext: &str) -> Result<T, PayloadError> {
        let value = self.decrypt_value(ciphertext)?;
        serde_json::from_value(value).map_err(|e| PayloadError::MissingFields(e.to_string()))
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stamps: Vec<i64> = self.keys.iter().map(|(stamp, _)| *stamp).collect();
        f.debug_struct("KeyRing").field("stamps", &stamps).finish()
    }
}

fn decode_ciphertext(ciphertext: &str) -> Result<Vec<u8>, PayloadError> {
    Base64::decode_vec(ciphertext.trim()).map_err(|_| PayloadError::Encoding)
}

/// Encrypt raw bytes, returning base64 ciphertext.
pub fn encrypt_bytes(key: &RsaPublicKey, plaintext: &[u8]) -> Result<String, PayloadError> {
    let ciphertext = key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| PayloadError::Encrypt(e.to_string()))?;
    Ok(Base64::encode_string(&ciphertext))
}

/// Serialize `value` to JSON and encrypt it.
pub fn encrypt_json<T: Serialize>(key: &RsaPublicKey, value: &T) -> Result<String, PayloadError> {
    let json = serde_json::to_vec(value).map_err(|e| PayloadError::Serialize(e.to_string()))?;
    encrypt_bytes(key, &json)
}

/// Decrypt base64 ciphertext with a single key.
pub fn decrypt_bytes(key: &RsaPrivateKey, ciphertext: &str) -> Result<Vec<u8>, PayloadError> {
    let bytes = decode_ciphertext(ciphertext)?;
    key.decrypt(Pkcs1v15Encrypt, &bytes)
        .map_err(|_| PayloadError::NoMatchingKey)
}

/// Parse a PEM public key in SPKI or PKCS#1 form.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, PayloadError> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| PayloadError::InvalidPublicKey(e.to_string()))
}

/// Bytes PKCS#1 v1.5 padding takes from every block.
const PKCS1_PADDING_LEN: usize = 11;

/// Length of a base58 ledger address.
pub const ADDRESS_LEN: usize = 34;

/// Longest plaintext a key of `bits` seals in one block.
pub fn max_plaintext_len(bits: usize) -> usize {
    (bits / 8).saturating_sub(PKCS1_PADDING_LEN)
}

/// Base64 length of a ciphertext produced by a key of `bits`.
pub fn ciphertext_len(bits: usize) -> usize {
    let bytes = bits.div_ceil(8);
    bytes.div_ceil(3) * 4
}

/// Modulus size of a public key in bits.
pub fn key_bits(key: &RsaPublicKey) -> usize {
    key.size() * 8
}
