//! # Telemetry Configuration — environment-first typed config
//!
//! The pipeline is configured through environment variables (the deployment
//! interface of the surrounding lending service). `from_env` materializes a
//! fully typed config with documented defaults; alert channels become
//! explicit tagged variants rather than being detected by key presence at
//! dispatch time.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// SMTP transport settings for the email alert channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

/// An enabled alert delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Append one JSON line per alert to a daily file under `dir`.
    File { dir: PathBuf },
    Email(SmtpConfig),
    Webhook { url: String, token: String },
}

/// Top-level telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Passphrase for the master-key wrapper KDF (`ENCRYPTION_PASSWORD`).
    pub encryption_password: String,
    /// Salt for the master-key wrapper KDF (`ENCRYPTION_SALT`).
    pub encryption_salt: String,
    /// Directory holding the encrypted master key file (`ENCRYPTION_KEY_DIR`).
    pub key_dir: PathBuf,
    /// Directory holding the encrypted log files (`LOG_DIR`).
    pub log_dir: PathBuf,
    /// Whether log sinks encrypt at rest (`LOG_ENCRYPTION`).
    pub log_encryption: bool,
    /// Pending-buffer size that forces a sink flush (`LOG_MAX_BYTES`).
    pub log_max_bytes: usize,
    /// Backup retention window in days (`LOG_RETENTION_DAYS`).
    pub log_retention_days: u32,
    /// Whether backups are tar+gzip compressed (`LOG_COMPRESSION`).
    pub log_compression: bool,
    /// Directory receiving dated backups (`BACKUP_DIR`).
    pub backup_dir: PathBuf,
    /// Metrics collection interval (`MONITORING_INTERVAL_MS`).
    pub monitoring_interval_ms: u64,
    /// Minimum interval between two alerts of the same type+identifier.
    pub alert_cooldown_secs: i64,
    /// Enabled alert channels.
    pub channels: Vec<ChannelConfig>,
    /// Gate detailed error messages in admin responses (`TELEMETRY_DEBUG`).
    pub debug: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            encryption_password: "change-me".into(),
            encryption_salt: "shelfguard".into(),
            key_dir: "keys".into(),
            log_dir: "logs/encrypted".into(),
            log_encryption: true,
            log_max_bytes: 5 * 1024 * 1024,
            log_retention_days: 30,
            log_compression: true,
            backup_dir: "logs/backups".into(),
            monitoring_interval_ms: 30_000,
            alert_cooldown_secs: 300,
            channels: vec![ChannelConfig::File { dir: "logs/encrypted".into() }],
            debug: false,
        }
    }
}

impl TelemetryConfig {
    /// Build the config from the process environment, falling back to the
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let encryption_password = match env_var("ENCRYPTION_PASSWORD") {
            Some(v) => v,
            None => {
                warn!("ENCRYPTION_PASSWORD not set, using development default");
                defaults.encryption_password
            }
        };
        let encryption_salt = match env_var("ENCRYPTION_SALT") {
            Some(v) => v,
            None => {
                warn!("ENCRYPTION_SALT not set, using development default");
                defaults.encryption_salt
            }
        };

        let log_dir: PathBuf = env_var("LOG_DIR").map(Into::into).unwrap_or(defaults.log_dir);

        let mut channels = vec![ChannelConfig::File { dir: log_dir.clone() }];
        if let (Some(host), Some(to)) = (env_var("SMTP_HOST"), env_var("ALERT_EMAIL_TO")) {
            channels.push(ChannelConfig::Email(SmtpConfig {
                host,
                port: env_parse("SMTP_PORT", 587u16),
                username: env_var("SMTP_USER").unwrap_or_default(),
                password: env_var("SMTP_PASS").unwrap_or_default(),
                from: env_var("ALERT_EMAIL_FROM")
                    .unwrap_or_else(|| "shelfguard@localhost".into()),
                to,
            }));
        }
        if let Some(url) = env_var("ALERT_WEBHOOK_URL") {
            channels.push(ChannelConfig::Webhook {
                url,
                token: env_var("ALERT_WEBHOOK_TOKEN").unwrap_or_default(),
            });
        }

        let config = Self {
            encryption_password,
            encryption_salt,
            key_dir: env_var("ENCRYPTION_KEY_DIR").map(Into::into).unwrap_or(defaults.key_dir),
            log_dir,
            log_encryption: env_parse("LOG_ENCRYPTION", defaults.log_encryption),
            log_max_bytes: env_parse("LOG_MAX_BYTES", defaults.log_max_bytes),
            log_retention_days: env_parse("LOG_RETENTION_DAYS", defaults.log_retention_days),
            log_compression: env_parse("LOG_COMPRESSION", defaults.log_compression),
            backup_dir: env_var("BACKUP_DIR").map(Into::into).unwrap_or(defaults.backup_dir),
            monitoring_interval_ms: env_parse(
                "MONITORING_INTERVAL_MS",
                defaults.monitoring_interval_ms,
            ),
            alert_cooldown_secs: env_parse("ALERT_COOLDOWN_SECS", defaults.alert_cooldown_secs),
            channels,
            debug: env_parse("TELEMETRY_DEBUG", defaults.debug),
        };
        info!(
            log_dir = %config.log_dir.display(),
            encryption = config.log_encryption,
            channels = config.channels.len(),
            interval_ms = config.monitoring_interval_ms,
            "Telemetry configuration loaded"
        );
        config
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env_var(name) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, "Unparseable setting, using default");
                default
            }
        },
        None => default,
    }
}
