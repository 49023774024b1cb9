//! # Intrusion Monitor — per-request threat scoring and temporary IP bans
//!
//! Features:
//! - Blocked-IP short-circuit before any scoring (429-equivalent)
//! - Weighted pattern scoring over URL, query, body, and selected headers
//! - Classification: ≥50 high (blocked, 403-equivalent), ≥25 medium, >0 low
//! - Sliding-window failed-auth counting with automatic temporary bans
//! - Periodic sweep of stale windows and expired bans, plus lazy pruning on
//!   the read path
//!
//! Stateful middleware, not a pure function: every inspected request can
//! mutate the failed-attempt window and the blocked set. All clock-driven
//! paths have `_at(now)` variants so tests drive a simulated clock.

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use shelfguard_core::Severity;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::patterns::{
    PatternCatalogue, BODY_WEIGHT, HEADER_WEIGHT, INSPECTED_HEADERS, QUERY_WEIGHT,
    SUSPICIOUS_HEADERS, URL_WEIGHT,
};

/// Failed-auth window length.
pub const RATE_WINDOW_SECS: i64 = 15 * 60;
/// Failures inside the window that trigger a ban.
pub const BAN_THRESHOLD: usize = 5;
/// Ban duration.
pub const BAN_SECS: i64 = 60 * 60;
/// Sweep interval for the periodic cleanup task.
pub const SWEEP_INTERVAL_SECS: u64 = 5 * 60;
/// Per-IP cap on stored failure timestamps; bounds memory under attack.
const WINDOW_CAP: usize = 64;

const HIGH_SCORE: u32 = 50;
const MEDIUM_SCORE: u32 = 25;

// ── Types ───────────────────────────────────────────────────────────────────

/// The slice of an HTTP request the monitor inspects. The web layer builds
/// this; the monitor never sees framework types.
#[derive(Debug, Clone, Default)]
pub struct InspectedRequest {
    pub source_ip: Option<IpAddr>,
    pub url: String,
    pub query: String,
    pub body: String,
    /// Lower-cased header name → value.
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreatAssessment {
    pub score: u32,
    pub level: ThreatLevel,
    pub matched: Vec<String>,
}

/// Outcome of inspecting one request.
#[derive(Debug, Clone, Serialize)]
pub enum Verdict {
    Allow { assessment: ThreatAssessment },
    Block { status: u16, reason: String, assessment: ThreatAssessment },
}

impl Verdict {
    pub fn allowed(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }

    pub fn assessment(&self) -> &ThreatAssessment {
        match self {
            Verdict::Allow { assessment } | Verdict::Block { assessment, .. } => assessment,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorReport {
    pub inspected: u64,
    pub blocked_requests: u64,
    pub bans_issued: u64,
    pub currently_banned: u64,
    pub tracked_ips: u64,
}

// ── Monitor ─────────────────────────────────────────────────────────────────

pub struct IntrusionMonitor {
    catalogue: PatternCatalogue,
    /// IP → ordered failed-auth timestamps inside the rate window.
    failed_auth: RwLock<HashMap<IpAddr, Vec<i64>>>,
    /// IP → ban expiry timestamp.
    blocked: RwLock<HashMap<IpAddr, i64>>,
    inspected: AtomicU64,
    blocked_requests: AtomicU64,
    bans_issued: AtomicU64,
    running: Arc<AtomicBool>,
}

impl IntrusionMonitor {
    pub fn new() -> Self {
        Self {
            catalogue: PatternCatalogue::new(),
            failed_auth: RwLock::new(HashMap::new()),
            blocked: RwLock::new(HashMap::new()),
            inspected: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            bans_issued: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Request inspection ──────────────────────────────────────────────────

    pub fn inspect(&self, request: &InspectedRequest) -> Verdict {
        self.inspect_at(Utc::now().timestamp(), request)
    }

    pub fn inspect_at(&self, now: i64, request: &InspectedRequest) -> Verdict {
        self.inspected.fetch_add(1, Ordering::Relaxed);

        if let Some(ip) = request.source_ip {
            if self.is_blocked_at(now, ip) {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                warn!(ip = %ip, "Request denied: IP is temporarily banned");
                return Verdict::Block {
                    status: 429,
                    reason: "source address is temporarily banned".into(),
                    assessment: ThreatAssessment {
                        score: 0,
                        level: ThreatLevel::None,
                        matched: Vec::new(),
                    },
                };
            }
        }

        let assessment = self.score(request);
        match assessment.level {
            ThreatLevel::High => {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                warn!(
                    ip = ?request.source_ip,
                    score = assessment.score,
                    matched = ?assessment.matched,
                    "High-risk request blocked"
                );
                Verdict::Block {
                    status: 403,
                    reason: "request matched attack patterns".into(),
                    assessment,
                }
            }
            ThreatLevel::Medium | ThreatLevel::Low => {
                warn!(
                    ip = ?request.source_ip,
                    score = assessment.score,
                    matched = ?assessment.matched,
                    "Suspicious request allowed"
                );
                Verdict::Allow { assessment }
            }
            ThreatLevel::None => Verdict::Allow { assessment },
        }
    }

    /// Weighted pattern scoring across the request's locations.
    pub fn score(&self, request: &InspectedRequest) -> ThreatAssessment {
        let mut score = 0u32;
        let mut matched = Vec::new();

        for name in self.catalogue.matches(&request.url) {
            score += URL_WEIGHT;
            matched.push(format!("url:{name}"));
        }
        for name in self.catalogue.matches(&request.query) {
            score += QUERY_WEIGHT;
            matched.push(format!("query:{name}"));
        }
        for name in self.catalogue.matches(&request.body) {
            score += BODY_WEIGHT;
            matched.push(format!("body:{name}"));
        }
        for header in INSPECTED_HEADERS {
            if let Some(value) = request.headers.get(*header) {
                for name in self.catalogue.matches(value) {
                    score += HEADER_WEIGHT;
                    matched.push(format!("header:{header}:{name}"));
                }
            }
        }
        for header in SUSPICIOUS_HEADERS {
            if request.headers.contains_key(*header) {
                score += HEADER_WEIGHT;
                matched.push(format!("header:{header}"));
            }
        }

        let level = if score >= HIGH_SCORE {
            ThreatLevel::High
        } else if score >= MEDIUM_SCORE {
            ThreatLevel::Medium
        } else if score > 0 {
            ThreatLevel::Low
        } else {
            ThreatLevel::None
        };
        ThreatAssessment { score, level, matched }
    }

    // ── Failed-auth tracking ────────────────────────────────────────────────

    /// Record a failed authentication response from `ip`. Returns the number
    /// of failures in the window when this crossed the ban threshold, `None`
    /// otherwise.
    pub fn record_auth_failure(&self, ip: IpAddr) -> Option<usize> {
        self.record_auth_failure_at(Utc::now().timestamp(), ip)
    }

    pub fn record_auth_failure_at(&self, now: i64, ip: IpAddr) -> Option<usize> {
        let count = {
            let mut windows = self.failed_auth.write();
            let window = windows.entry(ip).or_default();
            window.retain(|&ts| now - ts < RATE_WINDOW_SECS);
            window.push(now);
            if window.len() > WINDOW_CAP {
                let excess = window.len() - WINDOW_CAP;
                window.drain(..excess);
            }
            window.len()
        };

        if count >= BAN_THRESHOLD {
            self.blocked.write().insert(ip, now + BAN_SECS);
            self.failed_auth.write().remove(&ip);
            self.bans_issued.fetch_add(1, Ordering::Relaxed);
            warn!(ip = %ip, failures = count, ban_secs = BAN_SECS, "IP banned");
            Some(count)
        } else {
            None
        }
    }

    /// Ban check with lazy expiry: an expired ban is removed and the IP's
    /// failure window cleared, so its counter restarts from zero.
    pub fn is_blocked_at(&self, now: i64, ip: IpAddr) -> bool {
        let expired = {
            let blocked = self.blocked.read();
            match blocked.get(&ip) {
                Some(&expiry) if expiry > now => return true,
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.blocked.write().remove(&ip);
            self.failed_auth.write().remove(&ip);
            info!(ip = %ip, "Ban expired");
        }
        false
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.is_blocked_at(Utc::now().timestamp(), ip)
    }

    // ── Maintenance ─────────────────────────────────────────────────────────

    /// Prune empty/stale failure windows and expired bans.
    pub fn sweep_at(&self, now: i64) -> (usize, usize) {
        let mut windows = self.failed_auth.write();
        let windows_before = windows.len();
        windows.retain(|_, w| {
            w.retain(|&ts| now - ts < RATE_WINDOW_SECS);
            !w.is_empty()
        });
        let windows_pruned = windows_before - windows.len();
        drop(windows);

        let mut blocked = self.blocked.write();
        let blocked_before = blocked.len();
        blocked.retain(|_, &mut expiry| expiry > now);
        let bans_pruned = blocked_before - blocked.len();

        if windows_pruned > 0 || bans_pruned > 0 {
            info!(windows_pruned, bans_pruned, "Intrusion state swept");
        }
        (windows_pruned, bans_pruned)
    }

    /// Start the periodic sweep task.
    pub fn start_sweeper(self: &Arc<Self>, interval_secs: u64) {
        self.running.store(true, Ordering::Relaxed);
        let monitor = Arc::clone(self);
        let running = self.running.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                monitor.sweep_at(Utc::now().timestamp());
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn report(&self) -> MonitorReport {
        MonitorReport {
            inspected: self.inspected.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            bans_issued: self.bans_issued.load(Ordering::Relaxed),
            currently_banned: self.blocked.read().len() as u64,
            tracked_ips: self.failed_auth.read().len() as u64,
        }
    }

    /// Severity of a failed-login burst for the alerting layer.
    pub fn burst_severity(count: usize) -> Severity {
        if count >= 2 * BAN_THRESHOLD {
            Severity::Critical
        } else {
            Severity::High
        }
    }
}

impl Default for IntrusionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
