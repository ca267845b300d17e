//! AES-256-GCM 加密/解密模块
//! 版本化密钥环 + 单值认证加密
//!
//! 负载格式：nonce(12) || ciphertext || tag(16)，密钥版本作为关联数据参与认证。

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    config::EncryptionConfig,
    error::{ConfigError, CryptoError, KeyringError},
};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const MAX_VERSION_LEN: usize = 32;

/// 加密数据
///
/// # Arguments
/// * `data` - 明文
/// * `key` - 密钥
/// * `aad` - 关联数据（密钥版本），解密时必须一致
///
/// # Returns
/// nonce + ciphertext + tag
pub fn encrypt_data(data: &[u8], key: &EncryptionKey, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CryptoError::EncryptionFailed)?;

    // 每次调用从 OS CSPRNG 取新 nonce
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: data, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// 解密数据
///
/// 长度不足、标签不匹配、关联数据不一致均返回 `AuthenticationFailed`。
pub fn decrypt_data(
    encrypted: &[u8],
    key: &EncryptionKey,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if encrypted.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CryptoError::AuthenticationFailed)?;

    let (nonce, ciphertext) = encrypted.split_at(NONCE_LEN);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// 加密密钥（使用Zeroize保护）
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// 随机生成（测试与密钥轮换工具使用）
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self::new(bytes)
    }

    /// 解析密钥文本：64 位 hex 或标准 base64，解码后必须恰好 32 字节
    pub fn parse(version: &str, encoded: &str) -> Result<Self, KeyringError> {
        let invalid = |reason: &str| KeyringError::InvalidKey {
            version: version.to_string(),
            reason: reason.to_string(),
        };

        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(invalid("empty key"));
        }

        let mut bytes = if encoded.len() == KEY_LEN * 2 {
            hex::decode(encoded).map_err(|_| invalid("invalid hex"))?
        } else {
            STANDARD
                .decode(encoded)
                .map_err(|_| invalid("expected 64 hex chars or base64"))?
        };

        if bytes.len() != KEY_LEN {
            bytes.zeroize();
            return Err(invalid("key must decode to exactly 32 bytes"));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self::new(key))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }

    /// 密钥指纹：SHA-256 前 8 字节 hex，可安全写入日志
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        hex::encode(&digest[..8])
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey({})", self.fingerprint())
    }
}

/// 版本号：1-32 位 [A-Za-z0-9_.-]
pub fn validate_version(version: &str) -> Result<(), KeyringError> {
    let ok = !version.is_empty()
        && version.len() <= MAX_VERSION_LEN
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if ok {
        Ok(())
    } else {
        Err(KeyringError::InvalidVersion(version.to_string()))
    }
}

/// 版本化密钥环
///
/// 加密始终使用 current；解密按密文中的版本标签查找。
pub struct Keyring {
    keys: Vec<(String, EncryptionKey)>,
    current: String,
}

impl Keyring {
    pub fn new(version: impl Into<String>, key: EncryptionKey) -> Result<Self, KeyringError> {
        let version = version.into();
        validate_version(&version)?;
        Ok(Self {
            keys: vec![(version.clone(), key)],
            current: version,
        })
    }

    /// 从配置构建；任何一把密钥无效都拒绝启动
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, ConfigError> {
        let mut ring: Option<Keyring> = None;
        for entry in &config.keys {
            let key = EncryptionKey::parse(&entry.version, &entry.key)?;
            match ring.as_mut() {
                None => ring = Some(Keyring::new(entry.version.clone(), key)?),
                Some(r) => r.insert(entry.version.clone(), key)?,
            }
        }

        let mut ring = ring.ok_or_else(|| ConfigError::Missing("encryption keys".into()))?;
        ring.set_current(&config.current_version)?;
        Ok(ring)
    }

    pub fn insert(&mut self, version: impl Into<String>, key: EncryptionKey) -> Result<(), KeyringError> {
        let version = version.into();
        validate_version(&version)?;
        if self.get(&version).is_some() {
            return Err(KeyringError::DuplicateVersion(version));
        }
        self.keys.push((version, key));
        Ok(())
    }

    pub fn set_current(&mut self, version: &str) -> Result<(), KeyringError> {
        if self.get(version).is_none() {
            return Err(KeyringError::UnknownVersion(version.to_string()));
        }
        self.current = version.to_string();
        Ok(())
    }

    /// 移除旧版本；当前版本不可移除
    pub fn remove(&mut self, version: &str) -> Result<EncryptionKey, KeyringError> {
        if version == self.current {
            return Err(KeyringError::RetireCurrent(version.to_string()));
        }
        let idx = self
            .keys
            .iter()
            .position(|(v, _)| v == version)
            .ok_or_else(|| KeyringError::UnknownVersion(version.to_string()))?;
        Ok(self.keys.remove(idx).1)
    }

    pub fn get(&self, version: &str) -> Option<&EncryptionKey> {
        self.keys.iter().find(|(v, _)| v == version).map(|(_, k)| k)
    }

    pub fn current(&self) -> (&str, &EncryptionKey) {
        // current 始终指向已存在的版本（set_current / remove 保证）
        let key = self
            .get(&self.current)
            .unwrap_or_else(|| &self.keys[0].1);
        (&self.current, key)
    }

    pub fn current_version(&self) -> &str {
        &self.current
    }

    pub fn versions(&self) -> Vec<String> {
        self.keys.iter().map(|(v, _)| v.clone()).collect()
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("current", &self.current)
            .field("versions", &self.versions())
            .finish()
    }
}
