//! Domain 模块
//!
//! 审计记录、加密字段与结构化值等领域模型

pub mod audit;
pub mod encrypted;
pub mod value;

// 重新导出常用类型
pub use audit::{
    AdminAction, AdminActionParams, AuditCounts, AuditLog, AuditLogFilter, AuditRecord,
    AuditStatistics, Category, DataAccessLog, DataAccessParams, DataOperation, LogActionParams,
    Page, RetentionReport, SecurityEvent, SecurityEventFilter, SecurityEventParams, Severity,
};
pub use encrypted::EncryptedValue;
pub use value::{metadata, Metadata, StructuredValue};
