//! 测试辅助模块
//! 提供测试配置、内存装配和外部服务地址

#![allow(dead_code)]

use std::sync::Arc;

use trustcore::{
    app_state::AppState,
    config::{
        AuditConfig, BruteForceConfig, Config, DatabaseConfig, EncryptionConfig, KeyConfig,
        LoggingConfig, RedisConfig,
    },
    repository::{AttemptStore, MemoryAuditStore},
    service::{AuditLogger, BruteForceGuard},
};

pub const V1_KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
/// base64 形式的 32 字节密钥
pub const V2_KEY_B64: &str = "ICEiIyQlJicoKSorLC0uLzAxMjM0NTY3ODk6Ozw9Pj8=";

/// 测试数据库URL
pub fn test_database_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://postgres@localhost:5432/trustcore_test".into())
}

/// 测试Redis URL
pub fn test_redis_url() -> String {
    std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into())
}

pub fn brute_force_config(max_attempts: u32) -> BruteForceConfig {
    BruteForceConfig {
        max_attempts,
        lockout_secs: 900,
        window_secs: 900,
        suspicious_ip_threshold: 3,
        suspicious_ip_window_secs: 3600,
        suspicious_ip_min_risk: 80,
        store_timeout_ms: 500,
    }
}

pub fn audit_config() -> AuditConfig {
    AuditConfig {
        retention_days: 90,
        security_retention_multiplier: 2,
    }
}

/// 不读环境变量的完整配置
pub fn test_config() -> Config {
    Config {
        database: DatabaseConfig {
            url: test_database_url(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 60,
            run_migrations: true,
        },
        redis: RedisConfig { url: None },
        logging: LoggingConfig {
            level: "debug".into(),
            format: "text".into(),
            enable_file_logging: false,
            log_file_path: None,
        },
        encryption: EncryptionConfig {
            current_version: "v1".into(),
            keys: vec![KeyConfig {
                version: "v1".into(),
                key: V1_KEY_HEX.into(),
            }],
            max_plaintext_len: 64 * 1024,
        },
        audit: audit_config(),
        brute_force: brute_force_config(5),
    }
}

/// 创建内存版应用状态
pub fn memory_state() -> AppState {
    AppState::in_memory(test_config()).expect("in-memory state")
}

/// 指定计数存储的守卫，审计写入内存存储
pub fn guard_with(
    store: Arc<dyn AttemptStore>,
    max_attempts: u32,
) -> (BruteForceGuard, Arc<MemoryAuditStore>) {
    let audit_store = Arc::new(MemoryAuditStore::new());
    let audit = Arc::new(AuditLogger::new(audit_store.clone(), audit_config()));
    (
        BruteForceGuard::new(store, audit, brute_force_config(max_attempts)),
        audit_store,
    )
}
