//! 字段加密集成测试
//!
//! 覆盖：往返、篡改检测、nonce 唯一性、密钥轮换、配置错误

mod common;

use trustcore::{
    config::KeyConfig,
    domain::EncryptedValue,
    error::{AppErrorCode, ConfigError, CryptoError},
    infrastructure::encryption::{EncryptionKey, Keyring},
    service::EncryptionManager,
    AppError,
};

fn manager() -> EncryptionManager {
    EncryptionManager::from_config(&common::test_config().encryption).unwrap()
}

#[test]
fn test_round_trip_various_inputs() {
    let m = manager();
    let long = "x".repeat(64 * 1024);
    let inputs = [
        "",
        "John Smith",
        "1-2-3 Roppongi, Minato-ku",
        "emoji 🔐 and ümlauts",
        long.as_str(),
    ];
    for input in inputs {
        let encrypted = m.encrypt(input).unwrap();
        assert!(!encrypted.as_str().contains(input) || input.is_empty());
        assert_eq!(m.decrypt(&encrypted).unwrap(), input);
    }
}

#[test]
fn test_over_limit_rejected() {
    let m = manager();
    let too_long = "x".repeat(64 * 1024 + 1);
    assert!(matches!(m.encrypt(&too_long), Err(CryptoError::FieldTooLong { .. })));
}

#[test]
fn test_every_byte_flip_detected() {
    let m = manager();
    let encrypted = m.encrypt("sensitive").unwrap();
    let (version, encoded) = encrypted.as_str().split_once(':').unwrap();

    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let payload = STANDARD.decode(encoded).unwrap();

    for i in 0..payload.len() {
        let mut tampered = payload.clone();
        tampered[i] ^= 0x80;
        let value = EncryptedValue::from_stored(format!("{}:{}", version, STANDARD.encode(&tampered)));
        assert_eq!(
            m.decrypt(&value),
            Err(CryptoError::AuthenticationFailed),
            "byte {} flip not detected",
            i
        );
    }
}

#[test]
fn test_nonce_uniqueness() {
    let m = manager();
    let a = m.encrypt("same plaintext").unwrap();
    let b = m.encrypt("same plaintext").unwrap();
    assert_ne!(a.as_str(), b.as_str());
}

#[test]
fn test_rotation_keeps_old_values_readable() {
    let m = manager();
    let old = m.encrypt_email("Jane.Doe@Example.com").unwrap();
    assert_eq!(old.key_version(), Some("v1"));

    let v2 = EncryptionKey::parse("v2", common::V2_KEY_B64).unwrap();
    m.install_key("v2", v2, true).unwrap();

    let new = m.encrypt_email("jane.doe@example.com").unwrap();
    assert_eq!(new.key_version(), Some("v2"));
    assert_eq!(m.decrypt_email(&old).unwrap(), "jane.doe@example.com");
    assert_eq!(m.decrypt_email(&new).unwrap(), "jane.doe@example.com");

    m.retire_key("v1").unwrap();
    assert_eq!(
        m.decrypt(&old),
        Err(CryptoError::KeyNotFound { version: "v1".into() })
    );
}

#[test]
fn test_reencrypt_is_idempotent() {
    let m = manager();
    let old = m.encrypt("555-0100").unwrap();
    m.install_key("v2", EncryptionKey::generate(), true).unwrap();

    let migrated = m.reencrypt(&old).unwrap().expect("v1 value needs migration");
    assert!(!m.needs_reencryption(&migrated));
    assert_eq!(m.reencrypt(&migrated).unwrap(), None);
    assert_eq!(m.decrypt(&migrated).unwrap(), "555-0100");
}

#[test]
fn test_keyring_from_config_rejects_bad_material() {
    let mut config = common::test_config().encryption;
    config.keys.push(KeyConfig {
        version: "v2".into(),
        key: "too-short".into(),
    });
    assert!(matches!(
        EncryptionManager::from_config(&config),
        Err(ConfigError::Keyring(_))
    ));

    let mut config = common::test_config().encryption;
    config.current_version = "v7".into();
    assert!(EncryptionManager::from_config(&config).is_err());
}

#[test]
fn test_debug_output_hides_secrets() {
    let m = manager();
    let value = m.encrypt("top secret").unwrap();
    let debug = format!("{:?}", value);
    assert!(debug.contains("v1"));
    assert!(!debug.contains(value.as_str()));
    assert_eq!(value.to_string(), "[ENCRYPTED]");

    let key = EncryptionKey::parse("v1", common::V1_KEY_HEX).unwrap();
    assert!(!format!("{:?}", key).contains(common::V1_KEY_HEX));

    let keyring = Keyring::new("v1", key).unwrap();
    assert_eq!(keyring.current_version(), "v1");
}

#[test]
fn test_crypto_errors_map_to_http() {
    let err: AppError = CryptoError::AuthenticationFailed.into();
    assert_eq!(err.code, AppErrorCode::DecryptionFailed);
    assert_eq!(err.status.as_u16(), 500);

    let err: AppError = CryptoError::KeyNotFound { version: "v0".into() }.into();
    assert_eq!(err.code, AppErrorCode::KeyNotFound);
}
