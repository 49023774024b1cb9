//! # Telemetry Stack — explicit wiring of every pipeline component
//!
//! Features:
//! - One constructor builds the whole pipeline from a `TelemetryConfig`; no
//!   global state, tests build as many stacks as they need
//! - Four log sinks over shared encryption (application, security, audit,
//!   error), each sealing under its own context
//! - Inbound hooks the web layer calls per request: inspection, auth-failure
//!   recording, latency/error accounting
//! - Background tasks for metrics collection, monitor sweeps, sink flushes,
//!   and scheduled backups, all stoppable for clean shutdown
//! - Admin surface returning JSON with error detail gated by the debug flag

use shelfguard_api::{InspectedRequest, IntrusionMonitor, ThreatLevel, Verdict};
use shelfguard_backup::{BackupOutcome, LogBackupService};
use shelfguard_core::{LogLevel, ShelfguardError, TelemetryConfig};
use shelfguard_crypto::EncryptionEngine;
use shelfguard_ops::{MetricsCollector, MetricsSnapshot, MetricsThresholds};
use shelfguard_siem::{AlertDispatcher, EncryptedLogSink};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Interval for the sink flush / cooldown sweep housekeeping task.
const HOUSEKEEPING_SECS: u64 = 30;
/// Interval between scheduled backups.
const BACKUP_INTERVAL_SECS: u64 = 24 * 60 * 60;

pub struct TelemetryStack {
    pub config: TelemetryConfig,
    pub engine: Arc<EncryptionEngine>,
    pub application_log: Arc<EncryptedLogSink>,
    pub security_log: Arc<EncryptedLogSink>,
    pub audit_log: Arc<EncryptedLogSink>,
    pub error_log: Arc<EncryptedLogSink>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub monitor: Arc<IntrusionMonitor>,
    pub metrics: Arc<MetricsCollector>,
    pub backup: Arc<LogBackupService>,
    running: Arc<AtomicBool>,
}

impl TelemetryStack {
    /// Build the full pipeline. Fails only if the master key can neither be
    /// loaded nor generated; everything downstream degrades instead.
    pub fn initialize(config: TelemetryConfig) -> anyhow::Result<Self> {
        let engine = Arc::new(EncryptionEngine::initialize(&config)?);

        let sink = |context: &str| {
            Arc::new(EncryptedLogSink::new(
                Arc::clone(&engine),
                context,
                &config.log_dir,
                config.log_max_bytes,
                config.log_encryption,
            ))
        };
        let application_log = sink("application");
        let security_log = sink("security");
        let audit_log = sink("audit");
        let error_log = sink("error");

        let dispatcher =
            Arc::new(AlertDispatcher::new(config.channels.clone(), config.alert_cooldown_secs));
        let monitor = Arc::new(IntrusionMonitor::new());
        let metrics = Arc::new(MetricsCollector::new(MetricsThresholds::default()));
        let backup = Arc::new(LogBackupService::new(
            Arc::clone(&engine),
            &config.log_dir,
            &config.backup_dir,
            config.log_compression,
            config.log_encryption,
            config.log_retention_days,
        ));

        info!(
            log_dir = %config.log_dir.display(),
            encrypted = config.log_encryption,
            channels = config.channels.len(),
            "Telemetry stack initialized"
        );
        Ok(Self {
            config,
            engine,
            application_log,
            security_log,
            audit_log,
            error_log,
            dispatcher,
            monitor,
            metrics,
            backup,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    // ── Background tasks ────────────────────────────────────────────────────

    pub fn start_background_tasks(self: &Arc<Self>) {
        self.running.store(true, Ordering::Relaxed);
        self.metrics
            .start_periodic(self.config.monitoring_interval_ms, Arc::clone(&self.dispatcher));
        self.monitor.start_sweeper(shelfguard_api::monitor::SWEEP_INTERVAL_SECS);

        let stack = Arc::clone(self);
        let running = self.running.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(HOUSEKEEPING_SECS));
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                stack.flush_all();
                let swept = stack.dispatcher.sweep_cooldowns_at(chrono::Utc::now().timestamp());
                if swept > 0 {
                    info!(swept, "Stale alert cooldowns released");
                }
            }
        });

        let stack = Arc::clone(self);
        let running = self.running.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(BACKUP_INTERVAL_SECS));
            // First tick fires immediately; skip it so startup is not a backup.
            ticker.tick().await;
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                stack.flush_all();
                let outcome = stack.backup.perform_backup();
                if !outcome.success {
                    error!(error = ?outcome.error, "Scheduled backup failed");
                }
            }
        });
        info!("Background telemetry tasks started");
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.metrics.stop();
        self.monitor.stop();
        self.flush_all();
        info!("Telemetry stack shut down");
    }

    fn flush_all(&self) {
        for sink in [&self.application_log, &self.security_log, &self.audit_log, &self.error_log] {
            if !sink.flush() {
                warn!(context = sink.context(), "Sink flush failed, entries retained");
            }
        }
    }

    // ── Inbound hooks (called by the web layer) ─────────────────────────────

    /// Inspect one request; log and alert on anything suspicious. The caller
    /// turns a `Block` verdict into the matching HTTP response.
    pub fn inspect_request(&self, request: &InspectedRequest) -> Verdict {
        let verdict = self.monitor.inspect(request);
        let assessment = verdict.assessment();
        // A ban denial carries a zero-score assessment; the denial is still
        // logged, not just the scored threats.
        if assessment.level != ThreatLevel::None || !verdict.allowed() {
            let ip = request
                .source_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".into());
            let message = if assessment.level == ThreatLevel::None {
                "Blocked source denied"
            } else {
                "Suspicious request"
            };
            self.security_log.log_event(
                if verdict.allowed() { LogLevel::Warn } else { LogLevel::Error },
                message,
                &serde_json::json!({
                    "ip": ip,
                    "url": request.url,
                    "score": assessment.score,
                    "level": assessment.level,
                    "patterns": assessment.matched,
                    "blocked": !verdict.allowed(),
                }),
            );
            if assessment.level >= ThreatLevel::Medium {
                self.dispatcher.alert_suspicious_activity(
                    &ip,
                    assessment.score,
                    &assessment.matched.join(", "),
                );
            }
        }
        verdict
    }

    /// Record a failed login; a burst past the ban threshold raises an alert.
    pub fn record_auth_failure(&self, ip: IpAddr, username: &str) {
        self.security_log.log_event(
            LogLevel::Warn,
            "Authentication failure",
            &serde_json::json!({ "ip": ip.to_string(), "username": username }),
        );
        if let Some(count) = self.monitor.record_auth_failure(ip) {
            self.dispatcher.alert_failed_logins(&ip.to_string(), count as u64);
        }
    }

    /// Per-request accounting for the metrics collector.
    pub fn record_request(&self, latency_ms: f64, is_error: bool) {
        self.metrics.record_request(latency_ms, is_error);
    }

    /// General-purpose application logging for the surrounding service.
    pub fn log_event(&self, level: LogLevel, message: &str, meta: &serde_json::Value) {
        match level {
            LogLevel::Error => self.error_log.log_event(level, message, meta),
            _ => self.application_log.log_event(level, message, meta),
        }
    }

    /// Compliance-relevant actions (loans, returns, patron record access).
    pub fn log_audit(&self, message: &str, meta: &serde_json::Value) {
        self.audit_log.log_event(LogLevel::Info, message, meta);
    }

    // ── Admin surface ───────────────────────────────────────────────────────

    pub fn security_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "monitor": self.monitor.report(),
            "dispatcher": self.dispatcher.report(),
            "sinks": [
                self.application_log.report(),
                self.security_log.report(),
                self.audit_log.report(),
                self.error_log.report(),
            ],
        })
    }

    pub fn encryption_stats(&self) -> serde_json::Value {
        serde_json::json!(self.engine.report())
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.collect()
    }

    /// Swap in a fresh master key. Previously sealed files stay sealed under
    /// the old key, so pending sinks are flushed first.
    pub fn rotate_master_key(&self) -> serde_json::Value {
        self.flush_all();
        match self.engine.rotate_master_key() {
            Ok(()) => serde_json::json!({ "success": true }),
            Err(e) => self.admin_error(e),
        }
    }

    /// Rotation plus destruction of the retained backup key; files sealed
    /// under the revoked key are gone for good.
    pub fn revoke_master_key(&self) -> serde_json::Value {
        self.flush_all();
        match self.engine.revoke_master_key() {
            Ok(()) => serde_json::json!({ "success": true }),
            Err(e) => self.admin_error(e),
        }
    }

    pub fn list_keys(&self) -> serde_json::Value {
        serde_json::json!(self.engine.list_keys())
    }

    pub fn trigger_backup(&self) -> BackupOutcome {
        self.flush_all();
        self.backup.perform_backup()
    }

    pub fn list_backups(&self) -> serde_json::Value {
        serde_json::json!(self.backup.list_backups())
    }

    /// Decrypted view of one day's log stream for investigations.
    pub fn decrypt_log(&self, context: &str, date: &str) -> serde_json::Value {
        let Some(sink) = self.sink_for(context) else {
            return self.admin_error(ShelfguardError::Config(format!(
                "unknown log context '{context}'"
            )));
        };
        match sink.read_entries(date) {
            Ok(entries) => serde_json::json!({ "success": true, "entries": entries }),
            Err(e) => self.admin_error(e),
        }
    }

    pub fn verify_log(&self, context: &str, date: &str) -> bool {
        self.sink_for(context).map(|sink| sink.verify_file(date)).unwrap_or(false)
    }

    /// Exercise the full delivery path without a real incident.
    pub fn send_test_alert(&self) -> bool {
        self.dispatcher.send_alert(
            "test",
            shelfguard_core::Severity::Low,
            "Test alert from the admin surface",
            "admin",
            serde_json::json!({}),
        )
    }

    fn sink_for(&self, context: &str) -> Option<&Arc<EncryptedLogSink>> {
        match context {
            "application" => Some(&self.application_log),
            "security" => Some(&self.security_log),
            "audit" => Some(&self.audit_log),
            "error" => Some(&self.error_log),
            _ => None,
        }
    }

    fn admin_error(&self, e: ShelfguardError) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": e.public_message(self.config.debug),
        })
    }
}
