//! # Shelfguard Ops — resource and latency telemetry
//!
//! Samples system and process health on a timer, keeps a rolling window of
//! request latencies fed by the web layer, and raises threshold alerts
//! through the dispatcher.

pub mod metrics_collector;

pub use metrics_collector::{MetricsCollector, MetricsSnapshot, MetricsThresholds};

#[cfg(test)]
mod tests;
