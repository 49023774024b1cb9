//! # Log Backup Service — dated archives with compression and encryption
//!
//! `perform_backup` runs the stages in order: copy log files into
//! `backup-{YYYY-MM-DD-HHMMSS}/`, write a manifest, tar+gzip when compression
//! is on, seal the archive under the `"backup"` context when encryption is
//! on, then prune anything older than the retention window. A failure aborts
//! the failing stage and comes back as `{success: false, error}` — nothing
//! here panics past the top-level call.

use chrono::{TimeZone, Utc};
use shelfguard_core::{ShelfguardError, ShelfguardResult};
use shelfguard_crypto::{EncryptedEnvelope, EncryptionEngine};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const BACKUP_PREFIX: &str = "backup-";
const STAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct BackupManifest {
    created_at: String,
    files: Vec<ManifestEntry>,
    total_bytes: u64,
    compressed: bool,
    encrypted: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ManifestEntry {
    name: String,
    bytes: u64,
}

/// Result of a backup or restore run; errors are reported, not thrown.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BackupOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub path: Option<PathBuf>,
    pub files: Vec<String>,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BackupInfo {
    pub name: String,
    pub created_at: i64,
    pub bytes: u64,
}

pub struct LogBackupService {
    log_dir: PathBuf,
    backup_dir: PathBuf,
    compress: bool,
    encrypt: bool,
    retention_days: u32,
    engine: Arc<EncryptionEngine>,
    backups_completed: AtomicU64,
    backups_failed: AtomicU64,
    pruned: AtomicU64,
}

impl LogBackupService {
    pub fn new(
        engine: Arc<EncryptionEngine>,
        log_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        compress: bool,
        encrypt: bool,
        retention_days: u32,
    ) -> Self {
        Self {
            log_dir: log_dir.into(),
            backup_dir: backup_dir.into(),
            compress,
            encrypt,
            retention_days,
            engine,
            backups_completed: AtomicU64::new(0),
            backups_failed: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
        }
    }

    // ── Backup ──────────────────────────────────────────────────────────────

    pub fn perform_backup(&self) -> BackupOutcome {
        let stamp = Utc::now().format(STAMP_FORMAT).to_string();
        match self.run_backup(&stamp) {
            Ok(outcome) => {
                self.backups_completed.fetch_add(1, Ordering::Relaxed);
                let pruned = self.prune_expired_at(Utc::now().timestamp());
                info!(
                    path = ?outcome.path,
                    files = outcome.files.len(),
                    bytes = outcome.total_bytes,
                    pruned,
                    "Backup completed"
                );
                outcome
            }
            Err(e) => {
                self.backups_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Backup failed");
                BackupOutcome { success: false, error: Some(e.to_string()), ..Default::default() }
            }
        }
    }

    fn run_backup(&self, stamp: &str) -> ShelfguardResult<BackupOutcome> {
        if !self.log_dir.exists() {
            return Err(ShelfguardError::Config(format!(
                "log directory {} does not exist",
                self.log_dir.display()
            )));
        }
        std::fs::create_dir_all(&self.backup_dir)?;
        let staging = self.backup_dir.join(format!("{BACKUP_PREFIX}{stamp}"));
        std::fs::create_dir_all(&staging)?;

        // Stage 1: copy log files.
        let mut entries = Vec::new();
        let mut total_bytes = 0u64;
        for entry in std::fs::read_dir(&self.log_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !(name.ends_with(".enc") || name.ends_with(".log")) {
                continue;
            }
            let bytes = entry.metadata()?.len();
            std::fs::copy(entry.path(), staging.join(&name))?;
            total_bytes += bytes;
            entries.push(ManifestEntry { name, bytes });
        }

        // Stage 2: manifest.
        let manifest = BackupManifest {
            created_at: Utc::now().to_rfc3339(),
            files: entries.clone(),
            total_bytes,
            compressed: self.compress,
            // Sealing only happens on a compressed archive (stage 4).
            encrypted: self.encrypt && self.compress,
        };
        std::fs::write(staging.join("manifest.json"), serde_json::to_vec_pretty(&manifest)?)?;

        let mut final_path = staging.clone();

        // Stage 3: tar+gzip the staging directory.
        if self.compress {
            let archive_path = self.backup_dir.join(format!("{BACKUP_PREFIX}{stamp}.tar.gz"));
            compress_dir(&staging, &archive_path)?;
            std::fs::remove_dir_all(&staging)?;
            final_path = archive_path;
        }

        // Stage 4: seal the archive under the backup context. Sealing works
        // on the single compressed archive; with compression off the staged
        // directory is left as-is and the mismatch is called out.
        if self.encrypt {
            if self.compress {
                let sealed_path = final_path.with_extension("gz.enc");
                let plain = std::fs::read(&final_path)?;
                let envelope = self.engine.encrypt(&plain, "backup")?;
                std::fs::write(&sealed_path, serde_json::to_vec(&envelope)?)?;
                std::fs::remove_file(&final_path)?;
                final_path = sealed_path;
            } else {
                warn!(
                    path = %final_path.display(),
                    "Backup encryption skipped: sealing requires compression"
                );
            }
        }

        Ok(BackupOutcome {
            success: true,
            error: None,
            path: Some(final_path),
            files: entries.into_iter().map(|e| e.name).collect(),
            total_bytes,
        })
    }

    // ── Restore ─────────────────────────────────────────────────────────────

    /// Reverse the backup pipeline: decrypt, decompress, and copy files back
    /// into the live log directory.
    pub fn restore_backup(&self, path: &Path) -> BackupOutcome {
        match self.run_restore(path) {
            Ok(files) => {
                info!(path = %path.display(), files = files.len(), "Backup restored");
                BackupOutcome {
                    success: true,
                    error: None,
                    path: Some(path.to_path_buf()),
                    files,
                    total_bytes: 0,
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Restore failed");
                BackupOutcome { success: false, error: Some(e.to_string()), ..Default::default() }
            }
        }
    }

    fn run_restore(&self, path: &Path) -> ShelfguardResult<Vec<String>> {
        if !path.exists() {
            return Err(ShelfguardError::Config(format!("{} does not exist", path.display())));
        }
        std::fs::create_dir_all(&self.log_dir)?;

        if path.is_dir() {
            return self.copy_back(path);
        }

        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let unpack_dir = self.backup_dir.join(".restore-tmp");
        if unpack_dir.exists() {
            std::fs::remove_dir_all(&unpack_dir)?;
        }
        std::fs::create_dir_all(&unpack_dir)?;

        let result = (|| {
            if name.ends_with(".enc") {
                let envelope: EncryptedEnvelope =
                    serde_json::from_slice(&std::fs::read(path)?)?;
                let archive = self.engine.decrypt(&envelope, "backup")?;
                decompress_to(&archive[..], &unpack_dir)?;
            } else {
                decompress_to(std::fs::File::open(path)?, &unpack_dir)?;
            }
            // The archive holds a single dated directory.
            let inner = std::fs::read_dir(&unpack_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .find(|p| p.is_dir())
                .unwrap_or_else(|| unpack_dir.clone());
            self.copy_back(&inner)
        })();

        let _ = std::fs::remove_dir_all(&unpack_dir);
        result
    }

    fn copy_back(&self, dir: &Path) -> ShelfguardResult<Vec<String>> {
        let mut restored = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !(name.ends_with(".enc") || name.ends_with(".log")) {
                continue;
            }
            std::fs::copy(entry.path(), self.log_dir.join(&name))?;
            restored.push(name);
        }
        Ok(restored)
    }

    // ── Retention ───────────────────────────────────────────────────────────

    /// Remove backups older than the retention window. Returns how many were
    /// pruned.
    pub fn prune_expired_at(&self, now: i64) -> usize {
        let cutoff = now - self.retention_days as i64 * 86_400;
        let Ok(entries) = std::fs::read_dir(&self.backup_dir) else { return 0 };
        let mut removed = 0usize;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(BACKUP_PREFIX) {
                continue;
            }
            let Some(created) = backup_timestamp(&name, &entry.path()) else { continue };
            if created >= cutoff {
                continue;
            }
            let result = if entry.path().is_dir() {
                std::fs::remove_dir_all(entry.path())
            } else {
                std::fs::remove_file(entry.path())
            };
            match result {
                Ok(()) => {
                    removed += 1;
                    self.pruned.fetch_add(1, Ordering::Relaxed);
                    info!(backup = %name, "Expired backup pruned");
                }
                Err(e) => warn!(backup = %name, error = %e, "Failed to prune backup"),
            }
        }
        removed
    }

    pub fn list_backups(&self) -> Vec<BackupInfo> {
        let Ok(entries) = std::fs::read_dir(&self.backup_dir) else { return Vec::new() };
        let mut backups: Vec<BackupInfo> = entries
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.starts_with(BACKUP_PREFIX) {
                    return None;
                }
                let created_at = backup_timestamp(&name, &entry.path())?;
                let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
                Some(BackupInfo { name, created_at, bytes })
            })
            .collect();
        backups.sort_by_key(|b| b.created_at);
        backups
    }

    pub fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "completed": self.backups_completed.load(Ordering::Relaxed),
            "failed": self.backups_failed.load(Ordering::Relaxed),
            "pruned": self.pruned.load(Ordering::Relaxed),
            "retention_days": self.retention_days,
            "compress": self.compress,
            "encrypt": self.encrypt,
        })
    }
}

/// Parse the creation time out of a backup name, falling back to the
/// filesystem modification time.
fn backup_timestamp(name: &str, path: &Path) -> Option<i64> {
    let stamp = name
        .trim_start_matches(BACKUP_PREFIX)
        .trim_end_matches(".tar.gz.enc")
        .trim_end_matches(".tar.gz");
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive).timestamp());
    }
    path.metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

fn compress_dir(dir: &Path, archive_path: &Path) -> ShelfguardResult<()> {
    let file = std::fs::File::create(archive_path)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "backup".into());
    builder.append_dir_all(&dir_name, dir)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn decompress_to(reader: impl std::io::Read, dest: &Path) -> ShelfguardResult<()> {
    let decoder = flate2::read::GzDecoder::new(reader);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest)?;
    Ok(())
}
