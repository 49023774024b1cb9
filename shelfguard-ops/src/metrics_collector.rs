//! # Metrics Collector — periodic health sampling with threshold alerts
//!
//! Uses sysinfo to read CPU, memory, and disk utilization plus this process's
//! memory, and folds in the request counters the web layer reports through
//! `record_request`. Each collection tick evaluates the snapshot against the
//! configured thresholds and routes breaches to the alert dispatcher, whose
//! cooldown keeps a sustained breach from becoming an alert storm.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use shelfguard_siem::AlertDispatcher;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::{info, warn};

/// Rolling latency window length.
const LATENCY_WINDOW: usize = 1000;

/// Utilization/latency limits that trigger alerts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsThresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
}

impl Default for MetricsThresholds {
    fn default() -> Self {
        Self { cpu: 0.80, memory: 0.85, disk: 0.90, error_rate: 0.05, avg_latency_ms: 1000.0 }
    }
}

/// Point-in-time readings; recomputed each tick, never persisted.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: i64,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub disk_utilization: f64,
    pub process_memory_bytes: u64,
    pub process_uptime_secs: i64,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ThresholdBreach {
    pub resource: &'static str,
    pub value: f64,
    pub threshold: f64,
}

pub struct MetricsCollector {
    system: Mutex<System>,
    latencies: RwLock<VecDeque<f64>>,
    requests: AtomicU64,
    errors: AtomicU64,
    thresholds: MetricsThresholds,
    started_at: i64,
    ticks: AtomicU64,
    running: Arc<AtomicBool>,
}

impl MetricsCollector {
    pub fn new(thresholds: MetricsThresholds) -> Self {
        Self {
            system: Mutex::new(System::new_all()),
            latencies: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            thresholds,
            started_at: Utc::now().timestamp(),
            ticks: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Ingestion ───────────────────────────────────────────────────────────

    /// Called once per completed HTTP request by the web layer.
    pub fn record_request(&self, latency_ms: f64, is_error: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut window = self.latencies.write();
        if window.len() >= LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency_ms);
    }

    /// Zero the request/error counters and the latency window.
    pub fn reset_metrics(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.latencies.write().clear();
        info!("Request metrics reset");
    }

    // ── Sampling ────────────────────────────────────────────────────────────

    pub fn collect(&self) -> MetricsSnapshot {
        let (cpu, memory, process_memory) = {
            let mut sys = self.system.lock();
            sys.refresh_all();
            let cpus = sys.cpus();
            let cpu = if cpus.is_empty() {
                0.0
            } else {
                cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64 / 100.0
            };
            let memory = if sys.total_memory() == 0 {
                0.0
            } else {
                sys.used_memory() as f64 / sys.total_memory() as f64
            };
            let process_memory = sysinfo::get_current_pid()
                .ok()
                .and_then(|pid| sys.process(pid))
                .map(|p| p.memory())
                .unwrap_or(0);
            (cpu, memory, process_memory)
        };

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks
            .iter()
            .fold((0u64, 0u64), |(t, a), d| (t + d.total_space(), a + d.available_space()));
        let disk = if total == 0 { 0.0 } else { 1.0 - available as f64 / total as f64 };

        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.snapshot_from(cpu, memory, disk, process_memory)
    }

    /// Assemble a snapshot from sampled utilization plus the request window.
    /// Split out so threshold tests can feed synthetic readings.
    pub fn snapshot_from(
        &self,
        cpu: f64,
        memory: f64,
        disk: f64,
        process_memory_bytes: u64,
    ) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let avg_latency = {
            let window = self.latencies.read();
            if window.is_empty() {
                0.0
            } else {
                window.iter().sum::<f64>() / window.len() as f64
            }
        };
        let now = Utc::now().timestamp();
        MetricsSnapshot {
            timestamp: now,
            cpu_utilization: cpu,
            memory_utilization: memory,
            disk_utilization: disk,
            process_memory_bytes,
            process_uptime_secs: now - self.started_at,
            request_count: requests,
            error_count: errors,
            error_rate: if requests == 0 { 0.0 } else { errors as f64 / requests as f64 },
            avg_latency_ms: avg_latency,
        }
    }

    // ── Threshold evaluation ────────────────────────────────────────────────

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<ThresholdBreach> {
        let t = &self.thresholds;
        let mut breaches = Vec::new();
        if snapshot.cpu_utilization > t.cpu {
            breaches.push(ThresholdBreach {
                resource: "cpu",
                value: snapshot.cpu_utilization,
                threshold: t.cpu,
            });
        }
        if snapshot.memory_utilization > t.memory {
            breaches.push(ThresholdBreach {
                resource: "memory",
                value: snapshot.memory_utilization,
                threshold: t.memory,
            });
        }
        if snapshot.disk_utilization > t.disk {
            breaches.push(ThresholdBreach {
                resource: "disk",
                value: snapshot.disk_utilization,
                threshold: t.disk,
            });
        }
        if snapshot.error_rate > t.error_rate {
            breaches.push(ThresholdBreach {
                resource: "error_rate",
                value: snapshot.error_rate,
                threshold: t.error_rate,
            });
        }
        if snapshot.avg_latency_ms > t.avg_latency_ms {
            breaches.push(ThresholdBreach {
                resource: "avg_latency_ms",
                value: snapshot.avg_latency_ms,
                threshold: t.avg_latency_ms,
            });
        }
        breaches
    }

    fn dispatch_breaches(&self, breaches: &[ThresholdBreach], dispatcher: &AlertDispatcher) {
        for breach in breaches {
            warn!(
                resource = breach.resource,
                value = breach.value,
                threshold = breach.threshold,
                "Metric threshold exceeded"
            );
            match breach.resource {
                "error_rate" => {
                    dispatcher.alert_high_error_rate(breach.value);
                }
                _ => {
                    dispatcher.alert_resource_usage(breach.resource, breach.value, breach.threshold);
                }
            }
        }
    }

    // ── Periodic task ───────────────────────────────────────────────────────

    pub fn start_periodic(
        self: &Arc<Self>,
        interval_ms: u64,
        dispatcher: Arc<AlertDispatcher>,
    ) {
        self.running.store(true, Ordering::Relaxed);
        let collector = Arc::clone(self);
        let running = self.running.clone();
        info!(interval_ms, "Metrics collector started");
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(100)));
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                let snapshot = collector.collect();
                let breaches = collector.evaluate(&snapshot);
                collector.dispatch_breaches(&breaches, &dispatcher);
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}
