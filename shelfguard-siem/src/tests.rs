#[cfg(test)]
mod tests {
    use crate::alert_dispatcher::AlertDispatcher;
    use crate::log_sink::EncryptedLogSink;
    use chrono::TimeZone;
    use shelfguard_core::{ChannelConfig, LogLevel, Severity, TelemetryConfig};
    use shelfguard_crypto::EncryptionEngine;
    use std::sync::Arc;

    fn engine(dir: &std::path::Path) -> Arc<EncryptionEngine> {
        let config = TelemetryConfig {
            encryption_password: "siem-tests".into(),
            encryption_salt: "siem-salt".into(),
            key_dir: dir.join("keys"),
            ..TelemetryConfig::default()
        };
        Arc::new(EncryptionEngine::initialize(&config).unwrap())
    }

    fn ts(date: &str, hour: u32) -> chrono::DateTime<chrono::Utc> {
        let date: chrono::NaiveDate = date.parse().unwrap();
        chrono::Utc
            .from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap())
    }

    // ── Log sink ────────────────────────────────────────────────────────────

    #[test]
    fn test_sink_write_flush_read() {
        let dir = tempfile::tempdir().unwrap();
        let sink =
            EncryptedLogSink::new(engine(dir.path()), "security", dir.path().join("logs"), 4096, true);
        sink.log_event(LogLevel::Warn, "failed login", &serde_json::json!({"ip": "10.0.0.9"}));
        assert!(sink.flush());

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let entries = sink.read_entries(&today).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("[WARN] failed login"));
        assert!(entries[0].contains("10.0.0.9"));

        // The on-disk form is an envelope, not plaintext.
        let raw = std::fs::read_to_string(
            dir.path().join("logs").join(format!("security-{today}.enc")),
        )
        .unwrap();
        assert!(!raw.contains("failed login"));
        assert!(sink.verify_file(&today));
    }

    #[test]
    fn test_sink_appends_across_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let sink =
            EncryptedLogSink::new(engine(dir.path()), "audit", dir.path().join("logs"), 4096, true);
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();

        sink.log_event(LogLevel::Info, "first", &serde_json::Value::Null);
        sink.flush();
        sink.log_event(LogLevel::Info, "second", &serde_json::Value::Null);
        sink.flush();

        let entries = sink.read_entries(&today).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("first"));
        assert!(entries[1].contains("second"));
    }

    #[test]
    fn test_size_rotation_single_flush() {
        let dir = tempfile::tempdir().unwrap();
        // Threshold small enough that the third entry crosses it.
        let sink =
            EncryptedLogSink::new(engine(dir.path()), "application", dir.path().join("logs"), 120, true);
        let now = ts("2031-05-10", 9);

        sink.log_event_at(now, LogLevel::Info, "entry one", &serde_json::Value::Null);
        sink.log_event_at(now, LogLevel::Info, "entry two", &serde_json::Value::Null);
        assert_eq!(sink.flushes(), 0);

        sink.log_event_at(now, LogLevel::Info, "entry three", &serde_json::Value::Null);
        // Exactly one flush, and the crossing entry sits in the new buffer.
        assert_eq!(sink.flushes(), 1);
        assert!(sink.report().pending_bytes > 0);

        let entries = sink.read_entries("2031-05-10").unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[2].contains("entry three"));
    }

    #[test]
    fn test_date_rotation_splits_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink =
            EncryptedLogSink::new(engine(dir.path()), "audit", dir.path().join("logs"), 4096, true);

        sink.log_event_at(ts("2031-05-10", 23), LogLevel::Info, "late entry", &serde_json::Value::Null);
        sink.log_event_at(ts("2031-05-11", 0), LogLevel::Info, "early entry", &serde_json::Value::Null);
        sink.flush();

        let day_one = sink.read_entries("2031-05-10").unwrap();
        let day_two = sink.read_entries("2031-05-11").unwrap();
        assert_eq!(day_one.len(), 1);
        assert!(day_one[0].contains("late entry"));
        assert_eq!(day_two.len(), 1);
        assert!(day_two[0].contains("early entry"));
    }

    #[test]
    fn test_sink_reload_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let logs = dir.path().join("logs");
        let now = ts("2031-05-12", 8);

        {
            let sink = EncryptedLogSink::new(engine.clone(), "security", &logs, 4096, true);
            sink.log_event_at(now, LogLevel::Info, "before restart", &serde_json::Value::Null);
            sink.flush();
        }
        // A fresh sink over the same directory appends, not truncates.
        let sink = EncryptedLogSink::new(engine, "security", &logs, 4096, true);
        sink.log_event_at(now, LogLevel::Info, "after restart", &serde_json::Value::Null);
        sink.flush();

        let entries = sink.read_entries("2031-05-12").unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_rotation_sets_unreadable_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let logs = dir.path().join("logs");
        let now = ts("2031-05-13", 9);

        let sink = EncryptedLogSink::new(engine.clone(), "audit", &logs, 4096, true);
        sink.log_event_at(now, LogLevel::Info, "old era", &serde_json::Value::Null);
        sink.flush();
        let sealed = std::fs::read(logs.join("audit-2031-05-13.enc")).unwrap();

        engine.rotate_master_key().unwrap();
        sink.log_event_at(now, LogLevel::Info, "new era", &serde_json::Value::Null);
        assert!(sink.flush());

        // The live file holds only the post-rotation entry.
        let entries = sink.read_entries("2031-05-13").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("new era"));

        // The old-key ciphertext was moved aside, byte for byte.
        let preserved: Vec<_> = std::fs::read_dir(&logs)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".unreadable-"))
            .collect();
        assert_eq!(preserved.len(), 1);
        assert_eq!(std::fs::read(preserved[0].path()).unwrap(), sealed);
    }

    #[test]
    fn test_plaintext_mode() {
        let dir = tempfile::tempdir().unwrap();
        let sink =
            EncryptedLogSink::new(engine(dir.path()), "application", dir.path().join("logs"), 4096, false);
        sink.log_event(LogLevel::Error, "db unreachable", &serde_json::Value::Null);
        sink.flush();

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let raw = std::fs::read_to_string(
            dir.path().join("logs").join(format!("application-{today}.log")),
        )
        .unwrap();
        assert!(raw.contains("db unreachable"));
    }

    // ── Alert dispatcher ────────────────────────────────────────────────────

    fn file_dispatcher(dir: &std::path::Path, cooldown: i64) -> AlertDispatcher {
        AlertDispatcher::new(vec![ChannelConfig::File { dir: dir.to_path_buf() }], cooldown)
    }

    #[test]
    fn test_cooldown_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = file_dispatcher(dir.path(), 300);

        assert!(dispatcher.send_alert_at(1000, "x", Severity::High, "m", "10.0.0.1", serde_json::Value::Null));
        assert!(!dispatcher.send_alert_at(1100, "x", Severity::High, "m", "10.0.0.1", serde_json::Value::Null));
        // Past the window it fires again.
        assert!(dispatcher.send_alert_at(1301, "x", Severity::High, "m", "10.0.0.1", serde_json::Value::Null));

        let report = dispatcher.report();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.suppressed, 1);
    }

    #[test]
    fn test_cooldown_is_per_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = file_dispatcher(dir.path(), 300);
        assert!(dispatcher.send_alert_at(1000, "x", Severity::High, "m", "10.0.0.1", serde_json::Value::Null));
        assert!(dispatcher.send_alert_at(1001, "x", Severity::High, "m", "10.0.0.2", serde_json::Value::Null));
        assert!(dispatcher.send_alert_at(1002, "y", Severity::High, "m", "10.0.0.1", serde_json::Value::Null));
    }

    #[test]
    fn test_file_channel_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = file_dispatcher(dir.path(), 300);
        dispatcher.send_alert("test_alert", Severity::Low, "hello", "global", serde_json::Value::Null);

        let path = dir
            .path()
            .join(format!("alerts-{}.log", chrono::Utc::now().format("%Y-%m-%d")));
        let raw = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["alert_type"], "test_alert");
        assert_eq!(parsed["severity"], "low");
    }

    #[test]
    fn test_failed_login_escalation() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = file_dispatcher(dir.path(), 0);
        dispatcher.alert_failed_logins("10.0.0.5", 5);
        dispatcher.alert_failed_logins("10.0.0.5", 12);

        let path = dir
            .path()
            .join(format!("alerts-{}.log", chrono::Utc::now().format("%Y-%m-%d")));
        let raw = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert!(lines[0].contains("\"high\""));
        assert!(lines[1].contains("\"critical\""));
    }

    #[test]
    fn test_webhook_without_runtime_counts_failure() {
        let dispatcher = AlertDispatcher::new(
            vec![ChannelConfig::Webhook {
                url: "http://127.0.0.1:9/hook".into(),
                token: String::new(),
            }],
            0,
        );
        // Plain #[test] threads carry no tokio runtime; the send must not
        // panic, and the channel records the miss.
        assert!(dispatcher.send_alert(
            "test_alert",
            Severity::Low,
            "m",
            "global",
            serde_json::Value::Null
        ));
        assert_eq!(dispatcher.report().delivery_failures, 1);
    }

    #[test]
    fn test_cooldown_sweep_bounds_map() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = file_dispatcher(dir.path(), 300);
        for i in 0..500 {
            dispatcher.send_alert_at(1000, "x", Severity::Low, "m", &format!("ip-{i}"), serde_json::Value::Null);
        }
        assert_eq!(dispatcher.report().tracked_cooldowns, 500);
        let swept = dispatcher.sweep_cooldowns_at(1000 + 300 * 10 + 1);
        assert_eq!(swept, 500);
        assert_eq!(dispatcher.report().tracked_cooldowns, 0);
    }
}
