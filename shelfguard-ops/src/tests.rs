#[cfg(test)]
mod tests {
    use crate::metrics_collector::{MetricsCollector, MetricsThresholds};

    #[test]
    fn test_latency_window_is_bounded() {
        let collector = MetricsCollector::new(MetricsThresholds::default());
        for i in 0..2500 {
            collector.record_request(i as f64, false);
        }
        let snapshot = collector.snapshot_from(0.0, 0.0, 0.0, 0);
        assert_eq!(snapshot.request_count, 2500);
        // Only the last 1000 latencies contribute: 1500..2499 → mean 1999.5.
        assert!((snapshot.avg_latency_ms - 1999.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_rate() {
        let collector = MetricsCollector::new(MetricsThresholds::default());
        for i in 0..100 {
            collector.record_request(10.0, i % 10 == 0);
        }
        let snapshot = collector.snapshot_from(0.0, 0.0, 0.0, 0);
        assert_eq!(snapshot.error_count, 10);
        assert!((snapshot.error_rate - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_reset_metrics() {
        let collector = MetricsCollector::new(MetricsThresholds::default());
        collector.record_request(50.0, true);
        collector.reset_metrics();
        let snapshot = collector.snapshot_from(0.0, 0.0, 0.0, 0);
        assert_eq!(snapshot.request_count, 0);
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(snapshot.avg_latency_ms, 0.0);
    }

    #[test]
    fn test_threshold_evaluation() {
        let collector = MetricsCollector::new(MetricsThresholds::default());
        // Healthy snapshot: no breaches.
        let healthy = collector.snapshot_from(0.20, 0.40, 0.50, 0);
        assert!(collector.evaluate(&healthy).is_empty());

        // CPU and disk over their limits.
        let stressed = collector.snapshot_from(0.95, 0.40, 0.99, 0);
        let breaches = collector.evaluate(&stressed);
        let resources: Vec<_> = breaches.iter().map(|b| b.resource).collect();
        assert_eq!(resources, vec!["cpu", "disk"]);
    }

    #[test]
    fn test_latency_threshold_breach() {
        let collector = MetricsCollector::new(MetricsThresholds::default());
        for _ in 0..10 {
            collector.record_request(2500.0, false);
        }
        let snapshot = collector.snapshot_from(0.0, 0.0, 0.0, 0);
        let breaches = collector.evaluate(&snapshot);
        assert!(breaches.iter().any(|b| b.resource == "avg_latency_ms"));
    }

    #[test]
    fn test_collect_produces_sane_readings() {
        let collector = MetricsCollector::new(MetricsThresholds::default());
        let snapshot = collector.collect();
        assert!((0.0..=1.0).contains(&snapshot.memory_utilization));
        assert!((0.0..=1.0).contains(&snapshot.disk_utilization));
        assert!(snapshot.process_uptime_secs >= 0);
        assert_eq!(collector.ticks(), 1);
    }
}
