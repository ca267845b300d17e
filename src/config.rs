//! 配置管理模块
//! 支持从环境变量和配置文件加载配置
//!
//! 启动时构造一次，通过构造函数注入各组件，不使用全局状态。

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub brute_force: BruteForceConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub run_migrations: bool,
}

/// Redis配置（未配置或不可达时使用数据库回退路径）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

/// 单个版本的密钥（hex 64 字符或 base64，解码后必须 32 字节）
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub version: String,
    pub key: String,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// 字段加密配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub current_version: String,
    pub keys: Vec<KeyConfig>,
    #[serde(default = "default_max_plaintext_len")]
    pub max_plaintext_len: usize,
}

fn default_max_plaintext_len() -> usize {
    64 * 1024
}

/// 审计配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub retention_days: u32,
    /// 已解决安全事件保留倍数
    pub security_retention_multiplier: u32,
}

/// 暴力破解防护配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceConfig {
    pub max_attempts: u32,
    pub lockout_secs: u64,
    pub window_secs: u64,
    pub suspicious_ip_threshold: u32,
    pub suspicious_ip_window_secs: u64,
    pub suspicious_ip_min_risk: u8,
    pub store_timeout_ms: u64,
}

impl BruteForceConfig {
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }

    pub fn attempt_window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn suspicious_ip_window(&self) -> Duration {
        Duration::from_secs(self.suspicious_ip_window_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/trustcore".into()),
            max_connections: env_parse("DB_MAX_CONNS").unwrap_or(16),
            min_connections: env_parse("DB_MIN_CONNS").unwrap_or(2),
            acquire_timeout_secs: env_parse("DB_ACQ_TIMEOUT_SECS").unwrap_or(5),
            idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT_SECS").unwrap_or(300),
            run_migrations: std::env::var("SKIP_MIGRATIONS").is_err(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: std::env::var("LOG_FILE_ENABLED")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: env_parse("AUDIT_RETENTION_DAYS").unwrap_or(90),
            security_retention_multiplier: env_parse("AUDIT_SECURITY_RETENTION_MULTIPLIER")
                .unwrap_or(2),
        }
    }
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            max_attempts: env_parse("LOGIN_MAX_ATTEMPTS").unwrap_or(5),
            lockout_secs: env_parse("LOGIN_LOCKOUT_SECS").unwrap_or(15 * 60),
            window_secs: env_parse("LOGIN_ATTEMPT_WINDOW_SECS").unwrap_or(15 * 60),
            suspicious_ip_threshold: env_parse("SUSPICIOUS_IP_THRESHOLD").unwrap_or(3),
            suspicious_ip_window_secs: env_parse("SUSPICIOUS_IP_WINDOW_SECS").unwrap_or(3600),
            suspicious_ip_min_risk: env_parse("SUSPICIOUS_IP_MIN_RISK").unwrap_or(80),
            store_timeout_ms: env_parse("ATTEMPT_STORE_TIMEOUT_MS").unwrap_or(500),
        }
    }
}

impl EncryptionConfig {
    /// 从环境变量读取密钥环
    ///
    /// `FIELD_ENCRYPTION_KEYS="v1:<key>,v2:<key>"`，`FIELD_ENCRYPTION_CURRENT_VERSION=v2`；
    /// 未指定当前版本时取列表最后一项。
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var("FIELD_ENCRYPTION_KEYS")
            .map_err(|_| ConfigError::Missing("FIELD_ENCRYPTION_KEYS".into()))?;

        let mut keys = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (version, key) = entry.split_once(':').ok_or_else(|| {
                ConfigError::Invalid("FIELD_ENCRYPTION_KEYS entries must be <version>:<key>".into())
            })?;
            keys.push(KeyConfig {
                version: version.trim().to_string(),
                key: key.trim().to_string(),
            });
        }

        let current_version = match std::env::var("FIELD_ENCRYPTION_CURRENT_VERSION") {
            Ok(v) => v,
            Err(_) => keys
                .last()
                .map(|k| k.version.clone())
                .ok_or_else(|| ConfigError::Missing("FIELD_ENCRYPTION_KEYS is empty".into()))?,
        };

        Ok(Self {
            current_version,
            keys,
            max_plaintext_len: env_parse("FIELD_ENCRYPTION_MAX_LEN")
                .unwrap_or_else(default_max_plaintext_len),
        })
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            logging: LoggingConfig::default(),
            encryption: EncryptionConfig::from_env()?,
            audit: AuditConfig::default(),
            brute_force: BruteForceConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::Invalid(format!(
                "failed to read config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Invalid(format!("failed to parse config file: {}", e)))
    }

    /// 配置文件存在时优先使用文件，否则读环境变量
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path),
            _ => Self::from_env(),
        }
    }

    /// 验证配置有效性（密钥材料本身在构建密钥环时校验）
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(ConfigError::Invalid(
                "DATABASE_URL must start with postgres:// or postgresql://".into(),
            ));
        }

        if let Some(url) = &self.redis.url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::Invalid(
                    "REDIS_URL must start with redis:// or rediss://".into(),
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "LOG_LEVEL must be one of: {:?}",
                valid_levels
            )));
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            return Err(ConfigError::Invalid("LOG_FORMAT must be 'json' or 'text'".into()));
        }

        if self.encryption.keys.is_empty() {
            return Err(ConfigError::Missing("encryption keys".into()));
        }
        if !self
            .encryption
            .keys
            .iter()
            .any(|k| k.version == self.encryption.current_version)
        {
            return Err(ConfigError::Invalid(format!(
                "current encryption version '{}' has no key",
                self.encryption.current_version
            )));
        }

        if self.audit.retention_days == 0 {
            return Err(ConfigError::Invalid("retention_days must be > 0".into()));
        }

        let bf = &self.brute_force;
        if bf.max_attempts == 0 || bf.lockout_secs == 0 || bf.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "brute force limits must be greater than zero".into(),
            ));
        }
        if bf.suspicious_ip_min_risk > 100 {
            return Err(ConfigError::Invalid("suspicious_ip_min_risk must be <= 100".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgres://test@localhost/test"
max_connections = 20
min_connections = 5
acquire_timeout_secs = 30
idle_timeout_secs = 600

[redis]
url = "redis://localhost:6379"

[logging]
level = "info"
format = "json"
enable_file_logging = false

[encryption]
current_version = "v2"

[[encryption.keys]]
version = "v1"
key = "{HEX_KEY}"

[[encryption.keys]]
version = "v2"
key = "{HEX_KEY}"

[audit]
retention_days = 30
security_retention_multiplier = 2

[brute_force]
max_attempts = 3
lockout_secs = 60
window_secs = 120
suspicious_ip_threshold = 3
suspicious_ip_window_secs = 3600
suspicious_ip_min_risk = 80
store_timeout_ms = 250
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.encryption.current_version, "v2");
        assert_eq!(config.encryption.keys.len(), 2);
        assert_eq!(config.encryption.max_plaintext_len, 64 * 1024);
        assert_eq!(config.brute_force.lockout_duration(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_missing_current_key() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgres://test@localhost/test"
max_connections = 4
min_connections = 1
acquire_timeout_secs = 5
idle_timeout_secs = 60

[logging]
level = "info"
format = "text"
enable_file_logging = false

[encryption]
current_version = "v9"

[[encryption.keys]]
version = "v1"
key = "{HEX_KEY}"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_redis_section_falls_back_to_env_default() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[encryption]
current_version = "v1"

[[encryption.keys]]
version = "v1"
key = "{HEX_KEY}"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        let expected = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty());
        assert_eq!(config.redis.url, expected);
        assert_eq!(config.redis.url, RedisConfig::default().url);
    }

    #[test]
    fn test_key_config_debug_hides_key() {
        let key = KeyConfig {
            version: "v1".into(),
            key: HEX_KEY.into(),
        };
        assert!(!format!("{:?}", key).contains(HEX_KEY));
    }
}
