//! 加密字段的持久化表示
//!
//! 存储格式：`<key_version>:<base64(nonce || ciphertext || tag)>`，写入 TEXT 列。

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// 版本标签与负载之间的分隔符（版本号中不允许出现）
pub const VERSION_SEPARATOR: char = ':';

/// 加密后的 PII 字段（姓名、地址、邮箱、电话）
///
/// 只承载密文；Debug 输出不包含负载。
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct EncryptedValue(String);

impl EncryptedValue {
    /// 包装从数据库读出的原始列值（不做校验，解密时再校验）
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub(crate) fn compose(key_version: &str, payload: &[u8]) -> Self {
        Self(format!(
            "{}{}{}",
            key_version,
            VERSION_SEPARATOR,
            STANDARD.encode(payload)
        ))
    }

    /// 拆分出版本标签和二进制负载；格式错误返回 None
    pub(crate) fn split(&self) -> Option<(&str, Vec<u8>)> {
        let (version, encoded) = self.0.split_once(VERSION_SEPARATOR)?;
        if version.is_empty() {
            return None;
        }
        let payload = STANDARD.decode(encoded).ok()?;
        Some((version, payload))
    }

    /// 嵌入的密钥版本
    pub fn key_version(&self) -> Option<&str> {
        self.0
            .split_once(VERSION_SEPARATOR)
            .map(|(v, _)| v)
            .filter(|v| !v.is_empty())
    }

    /// 持久化文本
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedValue")
            .field("key_version", &self.key_version().unwrap_or("?"))
            .finish_non_exhaustive()
    }
}

impl fmt::Display for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[ENCRYPTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_and_split() {
        let value = EncryptedValue::compose("v2", &[1, 2, 3]);
        assert_eq!(value.key_version(), Some("v2"));
        assert_eq!(value.split(), Some(("v2", vec![1, 2, 3])));
    }

    #[test]
    fn test_malformed_values() {
        assert!(EncryptedValue::from_stored("no-separator").split().is_none());
        assert!(EncryptedValue::from_stored(":AAAA").split().is_none());
        assert!(EncryptedValue::from_stored("v1:!!!").split().is_none());
    }

    #[test]
    fn test_debug_and_display_hide_payload() {
        let value = EncryptedValue::compose("v1", b"secret-bytes");
        let debug = format!("{:?}", value);
        assert!(debug.contains("v1"));
        assert!(!debug.contains(value.as_str()));
        assert_eq!(value.to_string(), "[ENCRYPTED]");
    }
}
