//! 字段级加密服务
//!
//! 在 AES-256-GCM 密钥环之上提供稳定接口：值规范化（邮箱、电话）、
//! 版本标签编码、密钥轮换与重加密。
//!
//! 本服务不写审计日志；读路径上的调用方遇到 `AuthenticationFailed`
//! 必须记录高风险安全事件（见 `utils::audit_helper::decrypt_for_display`）。

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use zeroize::Zeroizing;

use crate::{
    config::EncryptionConfig,
    domain::EncryptedValue,
    error::{ConfigError, CryptoError, KeyringError},
    infrastructure::encryption::{decrypt_data, encrypt_data, EncryptionKey, Keyring},
};

const SELF_TEST_PLAINTEXT: &str = "trustcore-encryption-self-test";

pub struct EncryptionManager {
    keyring: RwLock<Keyring>,
    max_plaintext_len: usize,
}

impl EncryptionManager {
    pub fn new(keyring: Keyring, max_plaintext_len: usize) -> Self {
        Self {
            keyring: RwLock::new(keyring),
            max_plaintext_len,
        }
    }

    /// 从配置构建；密钥环缺失或无效返回 ConfigError（启动失败）
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, ConfigError> {
        let keyring = Keyring::from_config(config)?;
        tracing::info!(
            current_version = %keyring.current_version(),
            versions = ?keyring.versions(),
            "Field encryption keyring loaded"
        );
        Ok(Self::new(keyring, config.max_plaintext_len))
    }

    fn keyring(&self) -> RwLockReadGuard<'_, Keyring> {
        self.keyring.read().unwrap_or_else(|e| e.into_inner())
    }

    fn keyring_mut(&self) -> RwLockWriteGuard<'_, Keyring> {
        self.keyring.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 用当前版本密钥加密
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedValue, CryptoError> {
        if plaintext.len() > self.max_plaintext_len {
            return Err(CryptoError::FieldTooLong {
                len: plaintext.len(),
                max: self.max_plaintext_len,
            });
        }

        let keyring = self.keyring();
        let (version, key) = keyring.current();
        let payload = encrypt_data(plaintext.as_bytes(), key, version.as_bytes())?;
        Ok(EncryptedValue::compose(version, &payload))
    }

    /// 按密文中的版本标签选择密钥解密
    pub fn decrypt(&self, value: &EncryptedValue) -> Result<String, CryptoError> {
        let (version, payload) = value.split().ok_or(CryptoError::AuthenticationFailed)?;

        let keyring = self.keyring();
        let key = keyring.get(version).ok_or_else(|| CryptoError::KeyNotFound {
            version: version.to_string(),
        })?;

        let plaintext = Zeroizing::new(decrypt_data(&payload, key, version.as_bytes())?);
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// 可空列：None 原样透传
    pub fn encrypt_field(&self, plaintext: Option<&str>) -> Result<Option<EncryptedValue>, CryptoError> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    pub fn decrypt_field(&self, value: Option<&EncryptedValue>) -> Result<Option<String>, CryptoError> {
        value.map(|v| self.decrypt(v)).transpose()
    }

    /// 邮箱：去首尾空白并转小写后加密
    pub fn encrypt_email(&self, raw: &str) -> Result<EncryptedValue, CryptoError> {
        self.encrypt(&normalize_email(raw))
    }

    pub fn decrypt_email(&self, value: &EncryptedValue) -> Result<String, CryptoError> {
        self.decrypt(value)
    }

    /// 电话：只保留数字，保留开头的 '+'
    pub fn encrypt_phone(&self, raw: &str) -> Result<EncryptedValue, CryptoError> {
        self.encrypt(&normalize_phone(raw))
    }

    pub fn decrypt_phone(&self, value: &EncryptedValue) -> Result<String, CryptoError> {
        self.decrypt(value)
    }

    pub fn current_version(&self) -> String {
        self.keyring().current_version().to_string()
    }

    pub fn key_versions(&self) -> Vec<String> {
        self.keyring().versions()
    }

    /// 各版本密钥指纹（可写日志）
    pub fn key_fingerprints(&self) -> Vec<(String, String)> {
        let keyring = self.keyring();
        keyring
            .versions()
            .into_iter()
            .filter_map(|v| keyring.get(&v).map(|k| (v.clone(), k.fingerprint())))
            .collect()
    }

    /// 是否需要重加密到当前版本
    pub fn needs_reencryption(&self, value: &EncryptedValue) -> bool {
        value.key_version() != Some(self.keyring().current_version())
    }

    /// 重加密一步：已是当前版本返回 None，重复执行安全
    pub fn reencrypt(&self, value: &EncryptedValue) -> Result<Option<EncryptedValue>, CryptoError> {
        if !self.needs_reencryption(value) {
            return Ok(None);
        }
        let plaintext = Zeroizing::new(self.decrypt(value)?);
        self.encrypt(&plaintext).map(Some)
    }

    /// 安装新密钥；make_current 为 true 时立即用于加密
    pub fn install_key(
        &self,
        version: &str,
        key: EncryptionKey,
        make_current: bool,
    ) -> Result<(), KeyringError> {
        let fingerprint = key.fingerprint();
        let mut keyring = self.keyring_mut();
        keyring.insert(version, key)?;
        if make_current {
            keyring.set_current(version)?;
        }
        tracing::info!(version, fingerprint = %fingerprint, make_current, "Encryption key installed");
        Ok(())
    }

    /// 退役旧密钥；当前版本不可退役
    pub fn retire_key(&self, version: &str) -> Result<(), KeyringError> {
        let key = self.keyring_mut().remove(version)?;
        tracing::warn!(version, fingerprint = %key.fingerprint(), "Encryption key retired");
        Ok(())
    }

    /// 启动自检：当前密钥加解密往返
    pub fn validate_encryption(&self) -> Result<(), CryptoError> {
        let encrypted = self.encrypt(SELF_TEST_PLAINTEXT)?;
        let decrypted = self.decrypt(&encrypted)?;
        if decrypted != SELF_TEST_PLAINTEXT {
            return Err(CryptoError::AuthenticationFailed);
        }
        Ok(())
    }
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if trimmed.starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    }
}
