//! # Encrypted Log Sink — buffered, date- and size-rotated encrypted writer
//!
//! Features:
//! - One file per context per day: `{context}-{YYYY-MM-DD}.enc`
//! - In-memory buffer of pending lines, flushed on date rollover or when the
//!   pending bytes cross the size threshold
//! - Flush is decrypt-then-append: the existing file is opened, the pending
//!   lines appended, and the whole content re-encrypted and written atomically
//! - Failed flushes keep the buffer for the next attempt (best-effort)
//! - An existing file that cannot be opened (key rotated away, corruption) is
//!   set aside with an `.unreadable-{unix}` suffix, never overwritten
//! - Plaintext passthrough mode (`.log` extension) when encryption is off
//!
//! Writers within one process serialize on the buffer mutex. Cross-process
//! writers to the same file race and are unsupported.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shelfguard_core::{LogLevel, ShelfguardError, ShelfguardResult};
use shelfguard_crypto::{EncryptedEnvelope, EncryptionEngine};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

struct BufferState {
    /// File name the pending lines belong to.
    filename: String,
    /// Pending plaintext lines, not yet on disk.
    pending: String,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SinkReport {
    pub context: String,
    pub writes: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub rotations: u64,
    pub pending_bytes: u64,
}

pub struct EncryptedLogSink {
    engine: Arc<EncryptionEngine>,
    context: String,
    log_dir: PathBuf,
    max_size: usize,
    encrypted: bool,
    state: Mutex<BufferState>,
    writes: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    rotations: AtomicU64,
}

impl EncryptedLogSink {
    pub fn new(
        engine: Arc<EncryptionEngine>,
        context: impl Into<String>,
        log_dir: impl Into<PathBuf>,
        max_size: usize,
        encrypted: bool,
    ) -> Self {
        Self {
            engine,
            context: context.into(),
            log_dir: log_dir.into(),
            max_size,
            encrypted,
            state: Mutex::new(BufferState { filename: String::new(), pending: String::new() }),
            writes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    fn filename_for(&self, date: &str) -> String {
        let ext = if self.encrypted { "enc" } else { "log" };
        format!("{}-{}.{}", self.context, date, ext)
    }

    /// Accept one structured event.
    pub fn log_event(&self, level: LogLevel, message: &str, meta: &serde_json::Value) {
        self.log_event_at(Utc::now(), level, message, meta);
    }

    /// Clock-explicit variant used by rotation tests.
    pub fn log_event_at(
        &self,
        now: DateTime<Utc>,
        level: LogLevel,
        message: &str,
        meta: &serde_json::Value,
    ) {
        let line = format!("{} [{}] {} {}\n", now.to_rfc3339(), level, message, meta);
        let mut state = self.state.lock();
        let filename = self.filename_for(&now.format("%Y-%m-%d").to_string());

        // Date rollover: the previous day's pending lines belong to the
        // previous day's file; flush them before switching.
        if state.filename != filename {
            if !state.pending.is_empty() {
                self.flush_locked(&mut state);
            }
            if !state.filename.is_empty() {
                self.rotations.fetch_add(1, Ordering::Relaxed);
            }
            state.filename = filename;
        }

        // Size rotation: exactly one flush before the threshold-crossing
        // entry lands in the fresh buffer.
        if !state.pending.is_empty() && state.pending.len() + line.len() > self.max_size {
            self.flush_locked(&mut state);
            self.rotations.fetch_add(1, Ordering::Relaxed);
        }

        state.pending.push_str(&line);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Encrypt and write everything pending. The buffer is retained when the
    /// write fails so the next flush retries.
    pub fn flush(&self) -> bool {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            return true;
        }
        if state.filename.is_empty() {
            state.filename = self.filename_for(&Utc::now().format("%Y-%m-%d").to_string());
        }
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut BufferState) -> bool {
        let path = self.log_dir.join(&state.filename);
        match self.write_file(&path, &state.pending) {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                state.pending.clear();
                true
            }
            Err(e) => {
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                error!(context = %self.context, path = %path.display(), error = %e,
                    "Log flush failed, retaining buffer");
                false
            }
        }
    }

    /// Decrypt-then-append: existing content plus the pending lines, rewritten
    /// as one envelope. No partial envelope can hit the disk — encryption
    /// completes in memory before the temp-file + rename write.
    fn write_file(&self, path: &Path, pending: &str) -> ShelfguardResult<()> {
        std::fs::create_dir_all(&self.log_dir)?;
        let mut content = match self.read_file(path) {
            Ok(existing) => existing,
            Err(e) => {
                // Old-key envelopes stay on disk after rotation; move the
                // unopenable file aside before writing a fresh one.
                let aside = preserve_unreadable(path)?;
                warn!(path = %path.display(), aside = %aside.display(), error = %e,
                    "Existing log unreadable, moved aside and starting fresh");
                String::new()
            }
        };
        content.push_str(pending);

        let bytes = if self.encrypted {
            let envelope = self.engine.encrypt(content.as_bytes(), &self.context)?;
            serde_json::to_vec(&envelope)?
        } else {
            content.into_bytes()
        };

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        restrict_file(&tmp)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_file(&self, path: &Path) -> ShelfguardResult<String> {
        if !path.exists() {
            return Ok(String::new());
        }
        let raw = std::fs::read(path)?;
        if !self.encrypted {
            return String::from_utf8(raw)
                .map_err(|e| ShelfguardError::Other(format!("log not utf-8: {e}")));
        }
        let envelope: EncryptedEnvelope = serde_json::from_slice(&raw)?;
        let plain = self.engine.decrypt(&envelope, &self.context)?;
        String::from_utf8(plain).map_err(|e| ShelfguardError::Other(format!("log not utf-8: {e}")))
    }

    // ── Inspection (admin surface) ──────────────────────────────────────────

    /// Decrypt a day's log for inspection. Pending lines are flushed first so
    /// the caller sees everything logged so far.
    pub fn read_entries(&self, date: &str) -> ShelfguardResult<Vec<String>> {
        self.flush();
        let path = self.log_dir.join(self.filename_for(date));
        let content = self.read_file(&path)?;
        Ok(content.lines().map(str::to_string).collect())
    }

    /// Integrity check of a day's file without surfacing decryption errors.
    pub fn verify_file(&self, date: &str) -> bool {
        let path = self.log_dir.join(self.filename_for(date));
        if !self.encrypted {
            return path.exists();
        }
        let Ok(raw) = std::fs::read(&path) else { return false };
        let Ok(envelope) = serde_json::from_slice::<EncryptedEnvelope>(&raw) else {
            return false;
        };
        self.engine.verify_integrity(&envelope, &self.context)
    }

    pub fn report(&self) -> SinkReport {
        SinkReport {
            context: self.context.clone(),
            writes: self.writes.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            pending_bytes: self.state.lock().pending.len() as u64,
        }
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

/// Rename an unopenable log file out of the way of the fresh write. The
/// timestamp keeps repeated rescues of the same file from colliding.
fn preserve_unreadable(path: &Path) -> std::io::Result<PathBuf> {
    let mut name =
        path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    name.push_str(&format!(".unreadable-{}", Utc::now().timestamp()));
    let aside = path.with_file_name(name);
    std::fs::rename(path, &aside)?;
    Ok(aside)
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
