//! # Keystore — master-key persistence
//!
//! The master key lives at `{key_dir}/master.key` as a JSON blob encrypted
//! under a wrapper key derived from the deployment passphrase+salt with a
//! deliberately slow KDF. The wrapper protects a rarely-read secret, so the
//! high round count is paid once per boot, not per log write.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use shelfguard_core::{ShelfguardError, ShelfguardResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// PBKDF2-HMAC-SHA512 rounds for the wrapper key.
pub const WRAPPER_KDF_ROUNDS: u32 = 100_000;
pub const MASTER_KEY_LEN: usize = 32;
const KEY_FILE: &str = "master.key";
const TAG_LEN: usize = 16;

/// Metadata for one file in the key directory, for the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFileInfo {
    pub name: String,
    pub bytes: u64,
    pub modified_at: i64,
}

/// On-disk wrapper around the master key.
#[derive(Debug, Serialize, Deserialize)]
struct WrappedKey {
    iv: String,
    tag: String,
    data: String,
    version: u32,
}

/// Handles reading, writing, and backing up the encrypted master key file.
pub struct Keystore {
    key_dir: PathBuf,
    wrapper_key: Zeroizing<[u8; MASTER_KEY_LEN]>,
}

impl Keystore {
    pub fn new(key_dir: impl Into<PathBuf>, passphrase: &str, salt: &str) -> Self {
        let mut wrapper_key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha512>(
            passphrase.as_bytes(),
            salt.as_bytes(),
            WRAPPER_KDF_ROUNDS,
            wrapper_key.as_mut(),
        );
        Self { key_dir: key_dir.into(), wrapper_key }
    }

    pub fn key_path(&self) -> PathBuf {
        self.key_dir.join(KEY_FILE)
    }

    pub fn old_key_path(&self) -> PathBuf {
        self.key_dir.join(format!("{KEY_FILE}.old"))
    }

    /// Load and unwrap the master key. Returns `Ok(None)` when the file is
    /// absent or unreadable under the current wrapper key, so the caller can
    /// regenerate instead of aborting.
    pub fn load(&self) -> ShelfguardResult<Option<Zeroizing<[u8; MASTER_KEY_LEN]>>> {
        let path = self.key_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let wrapped: WrappedKey = match serde_json::from_str(&raw) {
            Ok(w) => w,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Master key file is corrupt");
                return Ok(None);
            }
        };
        match self.unwrap_key(&wrapped) {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Master key could not be unwrapped");
                Ok(None)
            }
        }
    }

    /// Wrap and persist the master key with owner-only permissions.
    /// Synchronous on purpose: this runs once at boot and on rotation.
    pub fn store(&self, master_key: &[u8; MASTER_KEY_LEN]) -> ShelfguardResult<()> {
        std::fs::create_dir_all(&self.key_dir)?;
        restrict_dir(&self.key_dir)?;

        let wrapped = self.wrap_key(master_key)?;
        let path = self.key_path();
        let tmp = path.with_extension("key.tmp");
        std::fs::write(&tmp, serde_json::to_string(&wrapped)?)?;
        restrict_file(&tmp)?;
        std::fs::rename(&tmp, &path)?;
        info!(path = %path.display(), "Master key persisted");
        Ok(())
    }

    /// Preserve the current key file as `master.key.old` before rotation.
    /// Old backups are never deleted automatically.
    pub fn backup_current(&self) -> ShelfguardResult<()> {
        let path = self.key_path();
        if path.exists() {
            let backup = self.old_key_path();
            std::fs::copy(&path, &backup)?;
            restrict_file(&backup)?;
        }
        Ok(())
    }

    /// Delete the retained `.old` backup. Returns whether one existed.
    pub fn remove_backup(&self) -> ShelfguardResult<bool> {
        let backup = self.old_key_path();
        if !backup.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&backup)?;
        Ok(true)
    }

    /// Metadata for the key files on disk: the current key and, after a
    /// rotation, the retained backup.
    pub fn list_key_files(&self) -> Vec<KeyFileInfo> {
        [self.key_path(), self.old_key_path()]
            .into_iter()
            .filter_map(|path| {
                let meta = std::fs::metadata(&path).ok()?;
                let name = path.file_name()?.to_string_lossy().to_string();
                let modified_at = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                Some(KeyFileInfo { name, bytes: meta.len(), modified_at })
            })
            .collect()
    }

    fn wrap_key(&self, master_key: &[u8; MASTER_KEY_LEN]) -> ShelfguardResult<WrappedKey> {
        let cipher = Aes256Gcm::new_from_slice(self.wrapper_key.as_ref())
            .map_err(|e| ShelfguardError::KeyUnavailable(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut sealed = cipher
            .encrypt(&nonce, master_key.as_slice())
            .map_err(|e| ShelfguardError::KeyUnavailable(format!("key wrap failed: {e}")))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok(WrappedKey {
            iv: hex::encode(nonce),
            tag: hex::encode(tag),
            data: hex::encode(sealed),
            version: 1,
        })
    }

    fn unwrap_key(
        &self,
        wrapped: &WrappedKey,
    ) -> ShelfguardResult<Zeroizing<[u8; MASTER_KEY_LEN]>> {
        let iv = hex::decode(&wrapped.iv)
            .map_err(|e| ShelfguardError::DecryptionFailure(e.to_string()))?;
        let mut sealed = hex::decode(&wrapped.data)
            .map_err(|e| ShelfguardError::DecryptionFailure(e.to_string()))?;
        let mut tag = hex::decode(&wrapped.tag)
            .map_err(|e| ShelfguardError::DecryptionFailure(e.to_string()))?;
        sealed.append(&mut tag);

        let cipher = Aes256Gcm::new_from_slice(self.wrapper_key.as_ref())
            .map_err(|e| ShelfguardError::KeyUnavailable(e.to_string()))?;
        let plain = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| {
                ShelfguardError::DecryptionFailure("master key authentication failed".into())
            })?;
        if plain.len() != MASTER_KEY_LEN {
            return Err(ShelfguardError::DecryptionFailure(
                "master key has unexpected length".into(),
            ));
        }
        let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        key.copy_from_slice(&plain);
        Ok(key)
    }
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
