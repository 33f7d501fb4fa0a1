// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encryption keys and payload codec.
//!
//! - [`paths`]: on-disk layout of the daily keypairs
//! - [`store`]: keypair generation, rotation and expiry
//! - [`payload`]: RSA encryption of transaction metadata

pub mod paths;
pub mod payload;
pub mod store;

pub use paths::KeyPaths;
pub use payload::{
    ciphertext_len, encrypt_json, key_bits, max_plaintext_len, parse_public_key, FragmentPayload,
    HoldingPayload, KeyRing, PayloadError, PayoutPayload, ADDRESS_LEN,
};
pub use store::{key_stamp, EncryptionKeys, KeyError, KeyResult};
