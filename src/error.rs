use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

// ============ 领域错误 ============

/// 加解密错误
///
/// `AuthenticationFailed` 表示数据损坏或被篡改，调用方必须记录高风险安全事件，
/// 不得降级为空字符串。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key version '{version}' not found in keyring")]
    KeyNotFound { version: String },
    #[error("ciphertext authentication failed")]
    AuthenticationFailed,
    #[error("plaintext too long: {len} bytes (max {max})")]
    FieldTooLong { len: usize, max: usize },
    #[error("encryption failed")]
    EncryptionFailed,
}

/// 密钥环维护错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyringError {
    #[error("invalid key version '{0}'")]
    InvalidVersion(String),
    #[error("key version '{0}' already present")]
    DuplicateVersion(String),
    #[error("key version '{0}' not found")]
    UnknownVersion(String),
    #[error("cannot retire current key version '{0}'")]
    RetireCurrent(String),
    #[error("invalid key material for version '{version}': {reason}")]
    InvalidKey { version: String, reason: String },
}

/// 登录限流拒绝
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("account temporarily locked, retry after {}s", retry_after.as_secs())]
    Locked { retry_after: Duration },
}

/// 持久化错误（审计写入、尝试计数存储）
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// 审计查询错误
#[derive(Debug, thiserror::Error)]
pub enum AuditQueryError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// 暴力破解守卫错误
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Store(#[from] PersistenceError),
}

/// 启动配置错误（致命，进程拒绝启动）
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Keyring(#[from] KeyringError),
}

// ============ HTTP 错误 ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    BadRequest,
    RateLimitExceeded,
    KeyNotFound,
    DecryptionFailed,
    EncryptionFailed,
    ServiceUnavailable,
    Internal,
}

impl AppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppErrorCode::BadRequest => "bad_request",
            AppErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            AppErrorCode::KeyNotFound => "key_not_found",
            AppErrorCode::DecryptionFailed => "decryption_failed",
            AppErrorCode::EncryptionFailed => "encryption_failed",
            AppErrorCode::ServiceUnavailable => "service_unavailable",
            AppErrorCode::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    pub status: StatusCode,
    /// 仅限流拒绝时存在，写入 Retry-After
    pub retry_after: Option<Duration>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after_secs = self.retry_after.map(retry_after_header_secs);
        let body = ErrorBody {
            code: self.code.as_str(),
            message: &self.message,
            retry_after_secs,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Retry-After 以整秒表示，向上取整，且不小于 1
fn retry_after_header_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::BadRequest,
            message: msg.into(),
            status: StatusCode::BAD_REQUEST,
            retry_after: None,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::Internal,
            message: msg.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            retry_after: None,
        }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            code: AppErrorCode::ServiceUnavailable,
            message: msg.into(),
            status: StatusCode::SERVICE_UNAVAILABLE,
            retry_after: None,
        }
    }

    pub fn locked(retry_after: Duration) -> Self {
        Self {
            code: AppErrorCode::RateLimitExceeded,
            message: "Too many failed login attempts, please try again later".to_string(),
            status: StatusCode::TOO_MANY_REQUESTS,
            retry_after: Some(retry_after),
        }
    }
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Locked { retry_after } => AppError::locked(retry_after),
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        let code = match err {
            CryptoError::KeyNotFound { .. } => AppErrorCode::KeyNotFound,
            CryptoError::AuthenticationFailed => AppErrorCode::DecryptionFailed,
            CryptoError::FieldTooLong { .. } => {
                return AppError::bad_request(err.to_string());
            }
            CryptoError::EncryptionFailed => AppErrorCode::EncryptionFailed,
        };
        Self {
            code,
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            retry_after: None,
        }
    }
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        tracing::error!(error = %err, "persistence failure");
        AppError::service_unavailable("Security store temporarily unavailable")
    }
}

impl From<AuditQueryError> for AppError {
    fn from(err: AuditQueryError) -> Self {
        match err {
            AuditQueryError::InvalidFilter(msg) => AppError::bad_request(msg),
            AuditQueryError::Persistence(e) => e.into(),
        }
    }
}

impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::RateLimited(e) => e.into(),
            GuardError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_maps_to_429_with_retry_after() {
        let err: AppError = RateLimitError::Locked {
            retry_after: Duration::from_millis(899_400),
        }
        .into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "900"
        );
    }

    #[test]
    fn test_authentication_failure_is_not_generic() {
        let err: AppError = CryptoError::AuthenticationFailed.into();
        assert_eq!(err.code, AppErrorCode::DecryptionFailed);

        let err: AppError = CryptoError::FieldTooLong { len: 10, max: 5 }.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_header_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_header_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_header_secs(Duration::from_secs(900)), 900);
    }
}
