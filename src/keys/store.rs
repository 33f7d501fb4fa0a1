// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Daily RSA keypair lifecycle.
//!
//! ## Lifecycle
//!
//! 1. **Creation**: the first caller of the UTC day generates a keypair,
//!    round-trip tests it, then writes both halves as PEM files named after
//!    the UTC-midnight timestamp. Generation is serialized per store and
//!    each file appears through a rename, so a concurrent caller either
//!    waits for the keypair or sees both halves complete.
//! 2. **Overlap**: every private key on disk stays usable for decryption
//!    until it expires, so payloads sealed just before midnight still open.
//! 3. **Expiry**: keypairs older than the key period are deleted, private
//!    halves first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveTime, Utc};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{info, warn};

use super::paths::KeyPaths;
use super::payload::{decrypt_bytes, encrypt_bytes, parse_public_key, KeyRing};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Plaintext used to prove a keypair works before it is trusted.
const ROUND_TRIP_PLAINTEXT: &[u8] = br#"{"n":"round-trip","v":0}"#;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("key generation failed: {0}")]
    Generate(String),

    #[error("key encoding failed: {0}")]
    Encode(String),

    #[error("unreadable key {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("keypair {0} failed the encrypt/decrypt round trip")]
    RoundTrip(i64),

    #[error("key generation task failed: {0}")]
    Task(String),
}

impl KeyError {
    pub fn code(&self) -> &'static str {
        match self {
            KeyError::Io(_) => "KEYS_IO",
            KeyError::Generate(_) => "KEYS_GENERATE",
            KeyError::Encode(_) => "KEYS_ENCODE",
            KeyError::Decode { .. } => "KEYS_DECODE",
            KeyError::RoundTrip(_) => "KEYS_ROUND_TRIP",
            KeyError::Task(_) => "KEYS_TASK",
        }
    }
}

pub type KeyResult<T> = Result<T, KeyError>;

/// UTC-midnight timestamp (milliseconds) naming the keypair for `now`.
pub fn key_stamp(now: DateTime<Utc>) -> i64 {
    now.date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
}

/// Encrypt a known plaintext with `public` and check `private` recovers it.
pub fn test_round_trip(public: &RsaPublicKey, private: &RsaPrivateKey) -> bool {
    encrypt_bytes(public, ROUND_TRIP_PLAINTEXT)
        .and_then(|ciphertext| decrypt_bytes(private, &ciphertext))
        .map(|plaintext| plaintext == ROUND_TRIP_PLAINTEXT)
        .unwrap_or(false)
}

/// Write `contents` next to `path` and rename it into place.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// On-disk store of daily keypairs.
///
/// Clones share the generation lock.
#[derive(Debug, Clone)]
pub struct EncryptionKeys {
    paths: KeyPaths,
    bits: usize,
    key_period_days: i64,
    generation: Arc<Mutex<()>>,
}

impl EncryptionKeys {
    pub fn new(paths: KeyPaths, bits: usize, key_period_days: i64) -> Self {
        Self {
            paths,
            bits,
            key_period_days,
            generation: Arc::new(Mutex::new(())),
        }
    }

    pub fn paths(&self) -> &KeyPaths {
        &self.paths
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Create the key directories. Idempotent.
    pub fn initialize(&self) -> KeyResult<()> {
        fs::create_dir_all(self.paths.private_dir())?;
        fs::create_dir_all(self.paths.public_dir())?;
        Ok(())
    }

    /// Make sure today's keypair exists, generating it if needed.
    ///
    /// Returns the stamp of the current keypair.
    pub fn ensure_current(&self, now: DateTime<Utc>) -> KeyResult<i64> {
        let stamp = key_stamp(now);
        if self.has_keypair(stamp) {
            return Ok(stamp);
        }

        let _generating = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.has_keypair(stamp) {
            self.generate(stamp)?;
        }
        Ok(stamp)
    }

    /// [`ensure_current`](Self::ensure_current) on the blocking pool, for
    /// async callers. RSA generation takes long enough to stall a worker.
    pub async fn prepare_current(&self, now: DateTime<Utc>) -> KeyResult<i64> {
        let keys = self.clone();
        tokio::task::spawn_blocking(move || keys.ensure_current(now))
            .await
            .map_err(|e| KeyError::Task(e.to_string()))?
    }

    fn has_keypair(&self, stamp: i64) -> bool {
        self.paths.private_key(stamp).exists() && self.paths.public_key(stamp).exists()
    }

    fn generate(&self, stamp: i64) -> KeyResult<()> {
        info!(stamp, bits = self.bits, "generating encryption keypair");

        let private = RsaPrivateKey::new(&mut OsRng, self.bits)
            .map_err(|e| KeyError::Generate(e.to_string()))?;
        let public = private.to_public_key();

        if !test_round_trip(&public, &private) {
            return Err(KeyError::RoundTrip(stamp));
        }

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encode(e.to_string()))?;
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encode(e.to_string()))?;

        self.initialize()?;
        // Private half first: a published public key always has its private key.
        write_atomic(&self.paths.private_key(stamp), private_pem.as_bytes())?;
        write_atomic(&self.paths.public_key(stamp), public_pem.as_bytes())?;
        Ok(())
    }

    /// PEM of the current public key, creating today's keypair if needed.
    pub fn current_public_pem(&self, now: DateTime<Utc>) -> KeyResult<String> {
        let stamp = self.ensure_current(now)?;
        Ok(fs::read_to_string(self.paths.public_key(stamp))?)
    }

    pub fn current_public_key(&self, now: DateTime<Utc>) -> KeyResult<RsaPublicKey> {
        let stamp = self.ensure_current(now)?;
        let path = self.paths.public_key(stamp);
        let pem = fs::read_to_string(&path)?;
        parse_public_key(&pem).map_err(|e| KeyError::Decode {
            path,
            message: e.to_string(),
        })
    }

    pub fn current_private_key(&self, now: DateTime<Utc>) -> KeyResult<RsaPrivateKey> {
        let stamp = self.ensure_current(now)?;
        self.read_private(stamp)
    }

    fn read_private(&self, stamp: i64) -> KeyResult<RsaPrivateKey> {
        let path = self.paths.private_key(stamp);
        let pem = fs::read_to_string(&path)?;
        RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| KeyError::Decode {
            path,
            message: e.to_string(),
        })
    }

    /// Stamps of the private keys on disk, oldest first.
    pub fn private_stamps(&self) -> KeyResult<Vec<i64>> {
        let mut stamps = Vec::new();
        if !self.paths.private_dir().exists() {
            return Ok(stamps);
        }
        for entry in fs::read_dir(self.paths.private_dir())? {
            let entry = entry?;
            if let Some(stamp) = entry
                .file_name()
                .to_str()
                .and_then(|name| self.paths.private_stamp(name))
            {
                stamps.push(stamp);
            }
        }
        stamps.sort_unstable();
        Ok(stamps)
    }

    /// Every readable private key, oldest first.
    ///
    /// Unreadable files are skipped with a warning so one corrupt key does
    /// not block decryption with the others.
    pub fn key_ring(&self) -> KeyResult<KeyRing> {
        let mut keys = Vec::new();
        for stamp in self.private_stamps()? {
            match self.read_private(stamp) {
                Ok(key) => keys.push((stamp, key)),
                Err(e) => warn!(stamp, error = %e, "skipping unreadable private key"),
            }
        }
        Ok(KeyRing::new(keys))
    }

    /// Delete keypairs older than the key period.
    ///
    /// Private keys are swept before public keys. Returns the stamps removed
    /// from the private store.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> KeyResult<Vec<i64>> {
        let cutoff = key_stamp(now) - self.key_period_days * MILLIS_PER_DAY;
        let mut removed = Vec::new();

        for stamp in self.private_stamps()? {
            if stamp < cutoff {
                fs::remove_file(self.paths.private_key(stamp))?;
                removed.push(stamp);
            }
        }

        if self.paths.public_dir().exists() {
            for entry in fs::read_dir(self.paths.public_dir())? {
                let entry = entry?;
                let stamp = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| self.paths.public_stamp(name));
                if matches!(stamp, Some(stamp) if stamp < cutoff) {
                    fs::remove_file(entry.path())?;
                }
            }
        }

        if !removed.is_empty() {
            info!(removed = ?removed, "expired encryption keys removed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::payload::tests::TEST_BITS;
    use crate::keys::payload::{encrypt_json, FragmentPayload};
    use chrono::{Duration, TimeZone};

    fn test_store(dir: &tempfile::TempDir, period: i64) -> EncryptionKeys {
        let keys = EncryptionKeys::new(KeyPaths::under(dir.path()), TEST_BITS, period);
        keys.initialize().expect("initialize key store");
        keys
    }

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn stamp_is_utc_midnight() {
        let stamp = key_stamp(noon(5));
        assert_eq!(
            stamp,
            Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0)
                .unwrap()
                .timestamp_millis()
        );
        assert_eq!(stamp, key_stamp(noon(5) + Duration::hours(11)));
    }

    #[test]
    fn ensure_current_is_idempotent_within_a_day() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test_store(&dir, 2);

        let first = keys.ensure_current(noon(1)).unwrap();
        let pem = keys.current_public_pem(noon(1)).unwrap();
        let second = keys.ensure_current(noon(1) + Duration::hours(6)).unwrap();

        assert_eq!(first, second);
        assert_eq!(pem, keys.current_public_pem(noon(1)).unwrap());
        assert!(pem.contains("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(keys.private_stamps().unwrap(), vec![first]);
    }

    #[test]
    fn generated_keypair_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test_store(&dir, 2);
        let public = keys.current_public_key(noon(1)).unwrap();
        let private = keys.current_private_key(noon(1)).unwrap();
        assert!(test_round_trip(&public, &private));
    }

    #[test]
    fn ring_opens_payloads_from_previous_day() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test_store(&dir, 2);

        let yesterday = keys.current_public_key(noon(1)).unwrap();
        keys.ensure_current(noon(2)).unwrap();

        let payload = FragmentPayload {
            n: "Ndest".to_string(),
            t: 0,
            p: 1,
            o: 1,
            u: "u1".to_string(),
        };
        let ciphertext = encrypt_json(&yesterday, &payload).unwrap();

        let ring = keys.key_ring().unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.decrypt::<FragmentPayload>(&ciphertext).unwrap(), payload);
    }

    #[test]
    fn expired_keys_are_removed_from_both_stores() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test_store(&dir, 1);

        let old = keys.ensure_current(noon(1)).unwrap();
        let kept = keys.ensure_current(noon(2)).unwrap();
        let today = keys.ensure_current(noon(3)).unwrap();

        let removed = keys.remove_expired(noon(3)).unwrap();
        assert_eq!(removed, vec![old]);
        assert_eq!(keys.private_stamps().unwrap(), vec![kept, today]);
        assert!(!keys.paths().public_key(old).exists());
        assert!(keys.paths().public_key(kept).exists());
    }

    #[test]
    fn concurrent_first_callers_serve_one_keypair() {
        use std::sync::Barrier;

        let payload = FragmentPayload {
            n: "Ndest".to_string(),
            t: 0,
            p: 1,
            o: 1,
            u: "u1".to_string(),
        };

        for round in 1..=5 {
            let dir = tempfile::tempdir().unwrap();
            let keys = test_store(&dir, 2);
            let barrier = Arc::new(Barrier::new(2));

            let served: Vec<RsaPublicKey> = (0..2)
                .map(|_| {
                    let keys = keys.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        keys.current_public_key(noon(round)).unwrap()
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect();

            assert_eq!(served[0], served[1]);
            let ring = keys.key_ring().unwrap();
            assert_eq!(ring.len(), 1);
            for public in &served {
                let ciphertext = encrypt_json(public, &payload).unwrap();
                assert_eq!(ring.decrypt::<FragmentPayload>(&ciphertext).unwrap(), payload);
            }
        }
    }

    #[tokio::test]
    async fn prepare_current_generates_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test_store(&dir, 2);

        let stamp = keys.prepare_current(noon(4)).await.unwrap();

        assert_eq!(stamp, key_stamp(noon(4)));
        assert_eq!(keys.private_stamps().unwrap(), vec![stamp]);
        assert_eq!(
            fs::read_dir(keys.paths().private_dir()).unwrap().count(),
            1,
            "no temporary files left behind"
        );
    }

    #[test]
    fn corrupt_private_key_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let keys = test_store(&dir, 2);
        keys.ensure_current(noon(2)).unwrap();
        fs::write(keys.paths().private_key(key_stamp(noon(1))), "garbage").unwrap();

        let ring = keys.key_ring().unwrap();
        assert_eq!(ring.len(), 1);
    }
}
