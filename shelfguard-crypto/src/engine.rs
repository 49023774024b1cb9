//! # Encryption Engine — context-scoped authenticated encryption
//!
//! Features:
//! - Master-key lifecycle (load, generate, rotate with `.old` backup, revoke)
//! - Per-context key derivation: PBKDF2-HMAC-SHA512 over (master, SHA-256(context))
//! - AES-256-GCM envelopes with hex-encoded iv/tag/data and RFC 3339 timestamps
//! - Integrity verification that never throws
//! - Operation counters and reporting for the admin surface
//!
//! Context keys are derived on every operation with a far cheaper KDF than
//! the master-key wrapper: log writes are frequent, boot is not.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use parking_lot::RwLock;
use sha2::{Digest, Sha256, Sha512};
use shelfguard_core::{ShelfguardError, ShelfguardResult, TelemetryConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::keystore::{KeyFileInfo, Keystore, MASTER_KEY_LEN};

pub const ALGORITHM: &str = "aes-256-gcm";
/// PBKDF2 rounds for per-context keys.
pub const CONTEXT_KDF_ROUNDS: u32 = 10_000;
const TAG_LEN: usize = 16;

// ── Envelope ────────────────────────────────────────────────────────────────

/// The serialized encrypted-at-rest record written to log and backup files.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncryptedEnvelope {
    pub iv: String,
    pub tag: String,
    pub data: String,
    pub context: String,
    pub timestamp: String,
    pub algorithm: String,
}

impl EncryptedEnvelope {
    /// Structural validity: all fields present and hex-decodable.
    pub fn well_formed(&self) -> bool {
        !self.context.is_empty()
            && self.algorithm == ALGORITHM
            && hex::decode(&self.iv).is_ok()
            && hex::decode(&self.tag).is_ok()
            && hex::decode(&self.data).is_ok()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EngineReport {
    pub encrypt_ops: u64,
    pub decrypt_ops: u64,
    pub decrypt_failures: u64,
    pub rotations: u64,
    pub algorithm: String,
    pub active_since: i64,
}

// ── Engine ──────────────────────────────────────────────────────────────────

pub struct EncryptionEngine {
    keystore: Keystore,
    master_key: RwLock<Zeroizing<[u8; MASTER_KEY_LEN]>>,
    encrypt_ops: AtomicU64,
    decrypt_ops: AtomicU64,
    decrypt_failures: AtomicU64,
    rotations: AtomicU64,
    active_since: i64,
}

impl EncryptionEngine {
    /// Load the master key from the keystore, generating and persisting a
    /// fresh one when the file is absent or corrupt. The only fatal path is
    /// failing both load and generation.
    pub fn initialize(config: &TelemetryConfig) -> ShelfguardResult<Self> {
        let keystore = Keystore::new(
            &config.key_dir,
            &config.encryption_password,
            &config.encryption_salt,
        );
        let master_key = match keystore.load()? {
            Some(key) => {
                info!("Master key loaded from keystore");
                key
            }
            None => {
                let key = generate_key();
                keystore
                    .store(&key)
                    .map_err(|e| ShelfguardError::KeyUnavailable(e.to_string()))?;
                info!("Master key generated");
                key
            }
        };
        Ok(Self {
            keystore,
            master_key: RwLock::new(master_key),
            encrypt_ops: AtomicU64::new(0),
            decrypt_ops: AtomicU64::new(0),
            decrypt_failures: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            active_since: chrono::Utc::now().timestamp(),
        })
    }

    /// Derive the key for a logical stream context. Deterministic for a given
    /// master key; never persisted.
    fn context_key(&self, context: &str) -> Zeroizing<[u8; MASTER_KEY_LEN]> {
        let digest = Sha256::digest(context.as_bytes());
        let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        let master = self.master_key.read();
        pbkdf2::pbkdf2_hmac::<Sha512>(master.as_ref(), &digest, CONTEXT_KDF_ROUNDS, key.as_mut());
        key
    }

    pub fn encrypt(&self, plaintext: &[u8], context: &str) -> ShelfguardResult<EncryptedEnvelope> {
        let key = self.context_key(context);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| ShelfguardError::Other(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| ShelfguardError::Other(format!("encryption failed: {e}")))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        self.encrypt_ops.fetch_add(1, Ordering::Relaxed);
        Ok(EncryptedEnvelope {
            iv: hex::encode(nonce),
            tag: hex::encode(tag),
            data: hex::encode(sealed),
            context: context.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            algorithm: ALGORITHM.to_string(),
        })
    }

    pub fn decrypt(
        &self,
        envelope: &EncryptedEnvelope,
        context: &str,
    ) -> ShelfguardResult<Vec<u8>> {
        self.decrypt_ops.fetch_add(1, Ordering::Relaxed);
        if envelope.context != context {
            return Err(ShelfguardError::ContextMismatch {
                expected: context.to_string(),
                found: envelope.context.clone(),
            });
        }
        let iv = hex::decode(&envelope.iv)
            .map_err(|e| self.decrypt_failure(format!("bad iv: {e}")))?;
        if iv.len() != 12 {
            return Err(self.decrypt_failure("bad iv length".into()));
        }
        let mut sealed = hex::decode(&envelope.data)
            .map_err(|e| self.decrypt_failure(format!("bad data: {e}")))?;
        let mut tag = hex::decode(&envelope.tag)
            .map_err(|e| self.decrypt_failure(format!("bad tag: {e}")))?;
        sealed.append(&mut tag);

        let key = self.context_key(context);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| ShelfguardError::Other(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| self.decrypt_failure("authentication failed (tampered or wrong key)".into()))
    }

    /// Structural check plus a full decrypt attempt. Converts every failure
    /// into `false` rather than surfacing it.
    pub fn verify_integrity(&self, envelope: &EncryptedEnvelope, context: &str) -> bool {
        if !envelope.well_formed() || envelope.context != context {
            return false;
        }
        self.decrypt(envelope, context).is_ok()
    }

    /// Generate a new master key, back up the old key file, persist, and swap
    /// the in-memory key. Forward-only: already-written envelopes stay under
    /// the old key and are not re-encrypted.
    pub fn rotate_master_key(&self) -> ShelfguardResult<()> {
        let new_key = generate_key();
        self.keystore.backup_current()?;
        self.keystore.store(&new_key)?;
        *self.master_key.write() = new_key;
        self.rotations.fetch_add(1, Ordering::Relaxed);
        warn!("Master key rotated; prior key file retained as backup");
        Ok(())
    }

    /// Rotate, then destroy the retained backup key file. Envelopes sealed
    /// under the revoked key become permanently unreadable.
    pub fn revoke_master_key(&self) -> ShelfguardResult<()> {
        self.rotate_master_key()?;
        self.keystore.remove_backup()?;
        warn!("Master key revoked; backup key file destroyed");
        Ok(())
    }

    /// Key files currently on disk, for the admin surface.
    pub fn list_keys(&self) -> Vec<KeyFileInfo> {
        self.keystore.list_key_files()
    }

    fn decrypt_failure(&self, reason: String) -> ShelfguardError {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
        ShelfguardError::DecryptionFailure(reason)
    }

    pub fn report(&self) -> EngineReport {
        EngineReport {
            encrypt_ops: self.encrypt_ops.load(Ordering::Relaxed),
            decrypt_ops: self.decrypt_ops.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            algorithm: ALGORITHM.to_string(),
            active_since: self.active_since,
        }
    }
}

fn generate_key() -> Zeroizing<[u8; MASTER_KEY_LEN]> {
    use aes_gcm::aead::rand_core::RngCore;
    let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    OsRng.fill_bytes(key.as_mut());
    key
}
