#[cfg(test)]
mod tests {
    use crate::engine::EncryptionEngine;
    use shelfguard_core::{ShelfguardError, TelemetryConfig};

    fn test_config(dir: &std::path::Path) -> TelemetryConfig {
        TelemetryConfig {
            encryption_password: "unit-test-passphrase".into(),
            encryption_salt: "unit-test-salt".into(),
            key_dir: dir.join("keys"),
            ..TelemetryConfig::default()
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EncryptionEngine::initialize(&test_config(dir.path())).unwrap();
        let envelope = engine.encrypt(b"overdue loan notice", "security").unwrap();
        let plain = engine.decrypt(&envelope, "security").unwrap();
        assert_eq!(plain, b"overdue loan notice");
        assert_eq!(envelope.algorithm, "aes-256-gcm");
    }

    #[test]
    fn test_context_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EncryptionEngine::initialize(&test_config(dir.path())).unwrap();
        let envelope = engine.encrypt(b"audit line", "audit").unwrap();
        match engine.decrypt(&envelope, "security") {
            Err(ShelfguardError::ContextMismatch { expected, found }) => {
                assert_eq!(expected, "security");
                assert_eq!(found, "audit");
            }
            other => panic!("expected ContextMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_tamper_detection_data() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EncryptionEngine::initialize(&test_config(dir.path())).unwrap();
        let mut envelope = engine.encrypt(b"patron record access", "security").unwrap();
        assert!(engine.verify_integrity(&envelope, "security"));

        // Flip one byte of the ciphertext.
        let mut data = hex::decode(&envelope.data).unwrap();
        data[0] ^= 0xff;
        envelope.data = hex::encode(data);
        assert!(!engine.verify_integrity(&envelope, "security"));
    }

    #[test]
    fn test_tamper_detection_iv() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EncryptionEngine::initialize(&test_config(dir.path())).unwrap();
        let mut envelope = engine.encrypt(b"patron record access", "security").unwrap();
        let mut iv = hex::decode(&envelope.iv).unwrap();
        iv[3] ^= 0x01;
        envelope.iv = hex::encode(iv);
        assert!(!engine.verify_integrity(&envelope, "security"));
    }

    #[test]
    fn test_verify_wrong_context_is_false_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EncryptionEngine::initialize(&test_config(dir.path())).unwrap();
        let envelope = engine.encrypt(b"x", "application").unwrap();
        assert!(!engine.verify_integrity(&envelope, "error"));
    }

    #[test]
    fn test_master_key_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let envelope = {
            let engine = EncryptionEngine::initialize(&config).unwrap();
            engine.encrypt(b"persisted", "application").unwrap()
        };
        // A second engine over the same key dir must load the same key.
        let engine = EncryptionEngine::initialize(&config).unwrap();
        assert_eq!(engine.decrypt(&envelope, "application").unwrap(), b"persisted");
    }

    #[test]
    fn test_corrupt_key_file_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        {
            EncryptionEngine::initialize(&config).unwrap();
        }
        std::fs::write(config.key_dir.join("master.key"), "not json at all").unwrap();
        let engine = EncryptionEngine::initialize(&config).unwrap();
        let envelope = engine.encrypt(b"fresh key", "security").unwrap();
        assert_eq!(engine.decrypt(&envelope, "security").unwrap(), b"fresh key");
    }

    #[test]
    fn test_rotation_backs_up_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = EncryptionEngine::initialize(&config).unwrap();
        let before = engine.encrypt(b"old era", "security").unwrap();

        engine.rotate_master_key().unwrap();
        assert!(config.key_dir.join("master.key.old").exists());

        // Rotation is forward-only: the old envelope no longer opens.
        assert!(engine.decrypt(&before, "security").is_err());
        let after = engine.encrypt(b"new era", "security").unwrap();
        assert_eq!(engine.decrypt(&after, "security").unwrap(), b"new era");
        assert_eq!(engine.report().rotations, 1);
    }

    #[test]
    fn test_revocation_destroys_backup_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = EncryptionEngine::initialize(&config).unwrap();

        engine.rotate_master_key().unwrap();
        assert!(config.key_dir.join("master.key.old").exists());

        engine.revoke_master_key().unwrap();
        assert!(!config.key_dir.join("master.key.old").exists());
        assert_eq!(engine.report().rotations, 2);

        // The replacement key is live.
        let envelope = engine.encrypt(b"post revocation", "audit").unwrap();
        assert_eq!(engine.decrypt(&envelope, "audit").unwrap(), b"post revocation");
    }

    #[test]
    fn test_list_keys_shows_current_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = EncryptionEngine::initialize(&config).unwrap();

        let keys = engine.list_keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "master.key");
        assert!(keys[0].bytes > 0);

        engine.rotate_master_key().unwrap();
        let names: Vec<String> = engine.list_keys().into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["master.key", "master.key.old"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        EncryptionEngine::initialize(&config).unwrap();
        let mode = std::fs::metadata(config.key_dir.join("master.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(&config.key_dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
