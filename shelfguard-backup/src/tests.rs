#[cfg(test)]
mod tests {
    use crate::backup_service::LogBackupService;
    use shelfguard_core::TelemetryConfig;
    use shelfguard_crypto::EncryptionEngine;
    use std::sync::Arc;

    fn test_engine(dir: &std::path::Path) -> Arc<EncryptionEngine> {
        let config = TelemetryConfig {
            encryption_password: "unit-test-passphrase".into(),
            encryption_salt: "unit-test-salt".into(),
            key_dir: dir.join("keys"),
            ..TelemetryConfig::default()
        };
        Arc::new(EncryptionEngine::initialize(&config).unwrap())
    }

    fn seed_logs(log_dir: &std::path::Path) {
        std::fs::create_dir_all(log_dir).unwrap();
        std::fs::write(log_dir.join("security-2026-08-27.enc"), b"{\"iv\":\"00\"}").unwrap();
        std::fs::write(log_dir.join("application-2026-08-27.log"), b"plain line\n").unwrap();
        // Non-log files stay behind.
        std::fs::write(log_dir.join("notes.txt"), b"ignore me").unwrap();
    }

    #[test]
    fn test_plain_backup_copies_logs_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        seed_logs(&log_dir);
        let service = LogBackupService::new(
            test_engine(dir.path()),
            &log_dir,
            dir.path().join("backups"),
            false,
            false,
            30,
        );

        let outcome = service.perform_backup();
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.files.len(), 2);
        assert!(!outcome.files.contains(&"notes.txt".to_string()));

        let path = outcome.path.unwrap();
        assert!(path.is_dir());
        assert!(path.join("manifest.json").exists());
        assert!(path.join("security-2026-08-27.enc").exists());
        assert!(path.join("application-2026-08-27.log").exists());
    }

    #[test]
    fn test_compressed_backup_replaces_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        seed_logs(&log_dir);
        let backup_dir = dir.path().join("backups");
        let service =
            LogBackupService::new(test_engine(dir.path()), &log_dir, &backup_dir, true, false, 30);

        let outcome = service.perform_backup();
        assert!(outcome.success, "{:?}", outcome.error);
        let path = outcome.path.unwrap();
        assert!(path.to_string_lossy().ends_with(".tar.gz"));
        // Staging directory was folded into the archive.
        let dirs: Vec<_> = std::fs::read_dir(&backup_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert!(dirs.is_empty());
    }

    #[test]
    fn test_encrypted_backup_restores_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        seed_logs(&log_dir);
        let service = LogBackupService::new(
            test_engine(dir.path()),
            &log_dir,
            dir.path().join("backups"),
            true,
            true,
            30,
        );

        let outcome = service.perform_backup();
        assert!(outcome.success, "{:?}", outcome.error);
        let path = outcome.path.unwrap();
        assert!(path.to_string_lossy().ends_with(".tar.gz.enc"));

        // Wipe the live logs, then bring them back from the sealed archive.
        std::fs::remove_dir_all(&log_dir).unwrap();
        let restored = service.restore_backup(&path);
        assert!(restored.success, "{:?}", restored.error);
        assert_eq!(restored.files.len(), 2);
        assert_eq!(
            std::fs::read(log_dir.join("application-2026-08-27.log")).unwrap(),
            b"plain line\n"
        );
    }

    #[test]
    fn test_encrypt_without_compress_leaves_plain_staging() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        seed_logs(&log_dir);
        let service = LogBackupService::new(
            test_engine(dir.path()),
            &log_dir,
            dir.path().join("backups"),
            false,
            true,
            30,
        );

        // Sealing needs a compressed archive; the run still succeeds and the
        // staging directory stays a plain directory.
        let outcome = service.perform_backup();
        assert!(outcome.success, "{:?}", outcome.error);
        let path = outcome.path.unwrap();
        assert!(path.is_dir());
        assert!(!path.to_string_lossy().ends_with(".enc"));
        assert!(path.join("manifest.json").exists());
    }

    #[test]
    fn test_prune_removes_expired_backups() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        std::fs::create_dir_all(&backup_dir).unwrap();
        std::fs::create_dir_all(backup_dir.join("backup-2020-01-01-000000")).unwrap();
        std::fs::write(backup_dir.join("backup-2020-02-01-000000.tar.gz"), b"old").unwrap();
        std::fs::create_dir_all(backup_dir.join("backup-2099-01-01-000000")).unwrap();

        let service = LogBackupService::new(
            test_engine(dir.path()),
            dir.path().join("logs"),
            &backup_dir,
            false,
            false,
            30,
        );
        let removed = service.prune_expired_at(chrono::Utc::now().timestamp());
        assert_eq!(removed, 2);
        assert!(backup_dir.join("backup-2099-01-01-000000").exists());
    }

    #[test]
    fn test_list_backups_sorted_by_creation() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        std::fs::create_dir_all(&backup_dir).unwrap();
        std::fs::write(backup_dir.join("backup-2026-08-02-120000.tar.gz"), b"b").unwrap();
        std::fs::write(backup_dir.join("backup-2026-08-01-120000.tar.gz"), b"a").unwrap();
        std::fs::write(backup_dir.join("unrelated.tar.gz"), b"x").unwrap();

        let service = LogBackupService::new(
            test_engine(dir.path()),
            dir.path().join("logs"),
            &backup_dir,
            true,
            false,
            30,
        );
        let backups = service.list_backups();
        let names: Vec<_> = backups.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["backup-2026-08-01-120000.tar.gz", "backup-2026-08-02-120000.tar.gz"]
        );
    }

    #[test]
    fn test_missing_log_dir_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogBackupService::new(
            test_engine(dir.path()),
            dir.path().join("no-such-logs"),
            dir.path().join("backups"),
            false,
            false,
            30,
        );
        let outcome = service.perform_backup();
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(service.report()["failed"], 1);
    }
}
