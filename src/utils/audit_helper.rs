//! 审计读路径辅助函数
//!
//! 展示加密字段时解密失败不得降级为空字符串：返回显式占位符并记录安全事件。

use crate::{
    domain::{audit::event_types, EncryptedValue, SecurityEventParams},
    error::CryptoError,
    service::{audit_service::AuditLogger, encryption_service::EncryptionManager},
};

/// 解密失败时的展示占位符
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "[DECRYPTION_FAILED]";

const RISK_TAMPERED: u8 = 95;
const RISK_KEY_MISSING: u8 = 70;

/// 解密的审计上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct DecryptContext<'a> {
    /// 所在表/字段，如 "leads.email"
    pub field: &'a str,
    pub record_id: Option<&'a str>,
    pub ip_address: Option<&'a str>,
}

/// 解密用于展示；失败返回 `[DECRYPTION_FAILED]` 并记录安全事件
///
/// - `AuthenticationFailed`：数据损坏或被篡改，风险分 95
/// - `KeyNotFound`：密钥版本已退役或缺失，风险分 70
pub async fn decrypt_for_display(
    encryption: &EncryptionManager,
    audit: &AuditLogger,
    value: &EncryptedValue,
    ctx: DecryptContext<'_>,
) -> String {
    match decrypt_required(encryption, audit, value, ctx).await {
        Ok(plaintext) => plaintext,
        Err(_) => DECRYPTION_FAILED_PLACEHOLDER.to_string(),
    }
}

/// 解密并把失败如实返回给调用方（同样记录安全事件）
pub async fn decrypt_required(
    encryption: &EncryptionManager,
    audit: &AuditLogger,
    value: &EncryptedValue,
    ctx: DecryptContext<'_>,
) -> Result<String, CryptoError> {
    let err = match encryption.decrypt(value) {
        Ok(plaintext) => return Ok(plaintext),
        Err(e) => e,
    };

    let params = match &err {
        CryptoError::KeyNotFound { version } => SecurityEventParams::new(
            event_types::ENCRYPTION_KEY_MISSING,
            format!("Encryption key version '{}' not available for {}", version, ctx.field),
            RISK_KEY_MISSING,
        )
        .detail("key_version", version.as_str()),
        _ => SecurityEventParams::new(
            event_types::DECRYPTION_FAILED,
            format!("Encrypted value failed authentication for {}", ctx.field),
            RISK_TAMPERED,
        )
        .detail("key_version", value.key_version().unwrap_or("unknown")),
    }
    .ip(ctx.ip_address)
    .detail("field", ctx.field)
    .detail("record_id", ctx.record_id)
    .action_taken("value_redacted");

    tracing::error!(field = ctx.field, record_id = ?ctx.record_id, error = %err, "Field decryption failed");
    audit.log_security_event(params).await;
    Err(err)
}
