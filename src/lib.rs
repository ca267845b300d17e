//! TrustCore - 数据保护与审计核心
//!
//! 字段级加密（版本化密钥环）、脱敏审计日志、登录暴力破解防护

pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod repository;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode};

pub mod prelude {
    pub use crate::{
        app_state::AppState,
        domain::{EncryptedValue, SecurityEventParams, StructuredValue},
        error::{AppError, AppErrorCode},
        service::{AuditLogger, BruteForceGuard, EncryptionManager},
    };
}
