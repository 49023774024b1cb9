//! # Alert Dispatcher — cooldown-deduplicated multi-channel notification
//!
//! Features:
//! - Cooldown keyed on (alert type, identifier): no duplicate alert pair
//!   inside the cooldown window
//! - Fan-out to every configured channel; a failing channel never blocks its
//!   siblings or the caller
//! - File channel appends one JSON line to a daily alert log
//! - Email channel renders a severity-colored HTML body over SMTP
//! - Webhook channel POSTs JSON with a bearer token
//! - Webhook/email delivery rides the ambient tokio runtime; without one the
//!   send is counted as a delivery failure instead of panicking
//! - Specialized helpers with per-type severity escalation

use chrono::Utc;
use parking_lot::RwLock;
use shelfguard_core::{ChannelConfig, Severity, SmtpConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const FAILED_LOGIN_CRITICAL_COUNT: u64 = 10;
/// Cooldown entries older than this multiple of the cooldown are swept.
const COOLDOWN_SWEEP_FACTOR: i64 = 10;

/// A dispatched notification.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Alert {
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub identifier: String,
    pub data: serde_json::Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DispatcherReport {
    pub dispatched: u64,
    pub suppressed: u64,
    pub delivery_failures: u64,
    pub tracked_cooldowns: u64,
    pub channels: usize,
}

pub struct AlertDispatcher {
    channels: Vec<ChannelConfig>,
    cooldown_secs: i64,
    /// (alert type, identifier) → last dispatch timestamp.
    cooldowns: RwLock<HashMap<(String, String), i64>>,
    http: reqwest::Client,
    dispatched: AtomicU64,
    suppressed: AtomicU64,
    delivery_failures: Arc<AtomicU64>,
}

impl AlertDispatcher {
    pub fn new(channels: Vec<ChannelConfig>, cooldown_secs: i64) -> Self {
        Self {
            channels,
            cooldown_secs,
            cooldowns: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
            dispatched: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            delivery_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Dispatch an alert unless the same (type, identifier) pair fired within
    /// the cooldown window. Returns whether the alert went out.
    pub fn send_alert(
        &self,
        alert_type: &str,
        severity: Severity,
        message: &str,
        identifier: &str,
        data: serde_json::Value,
    ) -> bool {
        self.send_alert_at(Utc::now().timestamp(), alert_type, severity, message, identifier, data)
    }

    /// Clock-explicit variant for cooldown tests.
    pub fn send_alert_at(
        &self,
        now: i64,
        alert_type: &str,
        severity: Severity,
        message: &str,
        identifier: &str,
        data: serde_json::Value,
    ) -> bool {
        let key = (alert_type.to_string(), identifier.to_string());
        {
            let mut cooldowns = self.cooldowns.write();
            if let Some(&last) = cooldowns.get(&key) {
                if now - last < self.cooldown_secs {
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }
            cooldowns.insert(key, now);
        }

        let alert = Alert {
            alert_type: alert_type.to_string(),
            severity,
            message: message.to_string(),
            identifier: identifier.to_string(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        };
        info!(alert_type, severity = %severity, identifier, "Alert dispatched");
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        for channel in &self.channels {
            match channel {
                ChannelConfig::File { dir } => {
                    if let Err(e) = append_alert_line(dir, &alert) {
                        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "Alert file channel failed");
                    }
                }
                ChannelConfig::Webhook { url, token } => {
                    self.spawn_webhook(url.clone(), token.clone(), alert.clone());
                }
                ChannelConfig::Email(smtp) => {
                    self.spawn_email(smtp.clone(), alert.clone());
                }
            }
        }
        true
    }

    // ── Channels ────────────────────────────────────────────────────────────

    fn spawn_webhook(&self, url: String, token: String, alert: Alert) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.delivery_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Webhook alert dropped: no async runtime on this thread");
            return;
        };
        let client = self.http.clone();
        let failures = self.delivery_failures.clone();
        handle.spawn(async move {
            let mut request = client
                .post(&url)
                .json(&alert)
                .timeout(std::time::Duration::from_secs(5));
            if !token.is_empty() {
                request = request.bearer_auth(&token);
            }
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(status = %resp.status(), "Webhook response not OK");
                }
                Err(e) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Webhook delivery failed");
                }
            }
        });
    }

    fn spawn_email(&self, smtp: SmtpConfig, alert: Alert) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.delivery_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Email alert dropped: no async runtime on this thread");
            return;
        };
        let failures = self.delivery_failures.clone();
        handle.spawn_blocking(move || {
            if let Err(e) = send_email(&smtp, &alert) {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Email delivery failed");
            }
        });
    }

    // ── Specialized helpers ─────────────────────────────────────────────────

    /// Failed-login burst; escalates high → critical at 10 failures.
    pub fn alert_failed_logins(&self, ip: &str, count: u64) -> bool {
        let severity = if count >= FAILED_LOGIN_CRITICAL_COUNT {
            Severity::Critical
        } else {
            Severity::High
        };
        self.send_alert(
            "failed_login_burst",
            severity,
            &format!("{count} failed login attempts from {ip}"),
            ip,
            serde_json::json!({ "ip": ip, "count": count }),
        )
    }

    pub fn alert_suspicious_activity(&self, ip: &str, score: u32, kind: &str) -> bool {
        let severity = if score >= 50 { Severity::High } else { Severity::Medium };
        self.send_alert(
            "suspicious_activity",
            severity,
            &format!("Suspicious request from {ip}: {kind} (score {score})"),
            ip,
            serde_json::json!({ "ip": ip, "score": score, "kind": kind }),
        )
    }

    pub fn alert_high_error_rate(&self, rate: f64) -> bool {
        self.send_alert(
            "high_error_rate",
            Severity::High,
            &format!("Request error rate at {:.1}%", rate * 100.0),
            "global",
            serde_json::json!({ "error_rate": rate }),
        )
    }

    pub fn alert_resource_usage(&self, resource: &str, value: f64, threshold: f64) -> bool {
        let severity = if value >= threshold * 1.1 { Severity::High } else { Severity::Medium };
        self.send_alert(
            "resource_usage",
            severity,
            &format!("{resource} at {:.1}% (threshold {:.1}%)", value * 100.0, threshold * 100.0),
            "resource",
            serde_json::json!({ "resource": resource, "value": value, "threshold": threshold }),
        )
    }

    // ── Maintenance ─────────────────────────────────────────────────────────

    /// Drop cooldown records old enough to be meaningless. Keeps the map
    /// bounded for the process lifetime.
    pub fn sweep_cooldowns_at(&self, now: i64) -> usize {
        let cutoff = now - self.cooldown_secs * COOLDOWN_SWEEP_FACTOR;
        let mut cooldowns = self.cooldowns.write();
        let before = cooldowns.len();
        cooldowns.retain(|_, &mut last| last >= cutoff);
        before - cooldowns.len()
    }

    pub fn report(&self) -> DispatcherReport {
        DispatcherReport {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            tracked_cooldowns: self.cooldowns.read().len() as u64,
            channels: self.channels.len(),
        }
    }
}

// ── Channel implementations ─────────────────────────────────────────────────

fn append_alert_line(dir: &Path, alert: &Alert) -> std::io::Result<()> {
    use std::io::Write;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("alerts-{}.log", Utc::now().format("%Y-%m-%d")));
    let line = serde_json::to_string(alert).unwrap_or_else(|_| alert.message.clone());
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

fn send_email(smtp: &SmtpConfig, alert: &Alert) -> Result<(), String> {
    use lettre::message::header::ContentType;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{Message, SmtpTransport, Transport};

    let email = Message::builder()
        .from(smtp.from.parse().map_err(|e| format!("bad from address: {e}"))?)
        .to(smtp.to.parse().map_err(|e| format!("bad to address: {e}"))?)
        .subject(format!("[shelfguard:{}] {}", alert.severity, alert.alert_type))
        .header(ContentType::TEXT_HTML)
        .body(render_email_html(alert))
        .map_err(|e| e.to_string())?;

    let mut builder = SmtpTransport::relay(&smtp.host).map_err(|e| e.to_string())?.port(smtp.port);
    if !smtp.username.is_empty() {
        builder =
            builder.credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()));
    }
    builder.build().send(&email).map_err(|e| e.to_string())?;
    Ok(())
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "#2e7d32",
        Severity::Medium => "#f9a825",
        Severity::High => "#ef6c00",
        Severity::Critical => "#c62828",
    }
}

fn render_email_html(alert: &Alert) -> String {
    format!(
        "<html><body>\
         <h2 style=\"color:{color}\">Shelfguard security alert: {ty}</h2>\
         <p><b>Severity:</b> <span style=\"color:{color}\">{sev}</span></p>\
         <p><b>Identifier:</b> {id}</p>\
         <p>{msg}</p>\
         <pre>{data}</pre>\
         <p><i>{ts}</i></p>\
         </body></html>",
        color = severity_color(alert.severity),
        ty = alert.alert_type,
        sev = alert.severity,
        id = alert.identifier,
        msg = alert.message,
        data = serde_json::to_string_pretty(&alert.data).unwrap_or_default(),
        ts = alert.timestamp,
    )
}
