use std::{sync::Arc, time::Duration};

use crate::{
    config::Config,
    error::ConfigError,
    infrastructure::{cache::RedisCtx, db::PgPool},
    repository::{
        AttemptStore, AuditAttemptStore, AuditStore, MemoryAttemptStore, MemoryAuditStore,
        PgAuditStore, RedisAttemptStore,
    },
    service::{AuditLogger, BruteForceGuard, EncryptionManager},
};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// 应用状态
/// 启动时构建一次，各组件通过构造函数注入配置，无全局可变状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// 仅内存模式下为 None
    pub pool: Option<PgPool>,
    pub encryption: Arc<EncryptionManager>,
    pub audit: Arc<AuditLogger>,
    pub brute_force: Arc<BruteForceGuard>,
}

impl AppState {
    /// 生产装配：Postgres 审计存储；Redis 可达时走快速路径，否则回退到审计表推导
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let encryption = Arc::new(EncryptionManager::from_config(&config.encryption)?);

        let pool = crate::infrastructure::db::init_pool(&config.database).await?;
        tracing::info!("Database connected");

        let audit_store: Arc<dyn AuditStore> = Arc::new(PgAuditStore::new(pool.clone()));
        let audit = Arc::new(AuditLogger::new(audit_store.clone(), config.audit.clone()));

        let attempt_store = select_attempt_store(&config, audit_store).await;
        let brute_force = Arc::new(BruteForceGuard::new(
            attempt_store,
            audit.clone(),
            config.brute_force.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            pool: Some(pool),
            encryption,
            audit,
            brute_force,
        })
    }

    /// 进程内装配（测试与单机开发）
    pub fn in_memory(config: Config) -> Result<Self, ConfigError> {
        let encryption = Arc::new(EncryptionManager::from_config(&config.encryption)?);
        let audit = Arc::new(AuditLogger::new(
            Arc::new(MemoryAuditStore::new()),
            config.audit.clone(),
        ));
        let brute_force = Arc::new(BruteForceGuard::new(
            Arc::new(MemoryAttemptStore::new()),
            audit.clone(),
            config.brute_force.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            pool: None,
            encryption,
            audit,
            brute_force,
        })
    }
}

async fn select_attempt_store(
    config: &Config,
    audit_store: Arc<dyn AuditStore>,
) -> Arc<dyn AttemptStore> {
    let fallback = |audit_store: Arc<dyn AuditStore>| -> Arc<dyn AttemptStore> {
        Arc::new(AuditAttemptStore::new(audit_store, config.brute_force.clone()))
    };

    let Some(url) = config.redis.url.as_deref() else {
        tracing::warn!("REDIS_URL not set, brute-force counters use database fallback (non-atomic)");
        return fallback(audit_store);
    };

    match RedisCtx::connect(url, REDIS_CONNECT_TIMEOUT).await {
        Ok(redis) => {
            tracing::info!("Redis connected, brute-force counters use atomic fast path");
            Arc::new(RedisAttemptStore::new(redis))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unreachable, brute-force counters use database fallback (non-atomic)");
            fallback(audit_store)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuditConfig, BruteForceConfig, DatabaseConfig, EncryptionConfig, KeyConfig, LoggingConfig,
        RedisConfig,
    };

    fn memory_config() -> Config {
        Config {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            logging: LoggingConfig::default(),
            encryption: EncryptionConfig {
                current_version: "v1".into(),
                keys: vec![KeyConfig {
                    version: "v1".into(),
                    key: "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
                        .into(),
                }],
                max_plaintext_len: 1024,
            },
            audit: AuditConfig::default(),
            brute_force: BruteForceConfig::default(),
        }
    }

    #[test]
    fn test_in_memory_state() {
        let state = AppState::in_memory(memory_config()).unwrap();
        assert!(state.pool.is_none());
        assert_eq!(state.brute_force.backend(), "memory");
        state.encryption.validate_encryption().unwrap();

        let check = tokio_test::block_on(state.brute_force.check_login_attempt("a@example.com", None))
            .unwrap();
        assert!(check.allowed);
    }

    #[test]
    fn test_in_memory_state_rejects_missing_key() {
        let mut config = memory_config();
        config.encryption.current_version = "v9".into();
        assert!(AppState::in_memory(config).is_err());
    }
}
