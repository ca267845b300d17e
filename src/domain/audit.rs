//! 审计记录模型
//!
//! 四类只追加记录：AuditLog / SecurityEvent / DataAccessLog / AdminAction。
//! SecurityEvent 仅允许修改 resolved / resolved_at / resolved_by。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value::{Metadata, StructuredValue};

/// 严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 根据操作结果判定
    ///
    /// 失败 → medium；delete/disable → high；create/update → medium；其余 low
    pub fn for_action(action: &str, success: bool) -> Self {
        if !success {
            return Self::Medium;
        }
        let action = action.to_lowercase();
        if action.contains("delete") || action.contains("disable") {
            return Self::High;
        }
        if action.contains("create") || action.contains("update") {
            return Self::Medium;
        }
        Self::Low
    }

    /// 根据 HTTP 状态码判定：5xx → high，4xx → medium
    pub fn for_status(status_code: u16) -> Self {
        match status_code {
            500.. => Self::High,
            400..=499 => Self::Medium,
            _ => Self::Low,
        }
    }

    /// 根据风险分判定：≥80 critical，≥60 high，≥40 medium
    pub fn for_risk_score(risk_score: u8) -> Self {
        match risk_score {
            80.. => Self::Critical,
            60..=79 => Self::High,
            40..=59 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// 审计分类（关键字匹配，非严格分类体系）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Auth,
    Admin,
    Security,
    Data,
    System,
}

const DATA_RESOURCES: [&str; 3] = ["booking", "property", "lead"];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Admin => "admin",
            Self::Security => "security",
            Self::Data => "data",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auth" => Some(Self::Auth),
            "admin" => Some(Self::Admin),
            "security" => Some(Self::Security),
            "data" => Some(Self::Data),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn for_action(action: &str, resource: &str) -> Self {
        let action = action.to_lowercase();
        let resource = resource.to_lowercase();

        if ["login", "auth", "mfa"].iter().any(|k| action.contains(k)) {
            Self::Auth
        } else if action.contains("admin") || resource.contains("admin") {
            Self::Admin
        } else if action.contains("security") || action.contains("encrypt") {
            Self::Security
        } else if DATA_RESOURCES.iter().any(|k| resource.contains(k)) {
            Self::Data
        } else {
            Self::System
        }
    }

    pub fn for_path(path: &str) -> Self {
        let path = path.to_lowercase();

        if path.contains("/admin/") {
            Self::Admin
        } else if path.contains("/auth/") || path.contains("/mfa/") {
            Self::Auth
        } else if path.contains("/security/") || path.contains("/encryption/") {
            Self::Security
        } else if DATA_RESOURCES.iter().any(|k| path.contains(&format!("/{}", k))) {
            Self::Data
        } else {
            Self::System
        }
    }
}

/// 数据访问操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOperation {
    Read,
    Create,
    Update,
    Delete,
}

impl DataOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// 暴力破解防护产生的安全事件类型（数据库回退路径依赖这些值推导状态）
pub mod event_types {
    pub const LOGIN_FAILURE: &str = "login_failure";
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const BRUTE_FORCE_BLOCKED: &str = "brute_force_blocked";
    pub const BRUTE_FORCE_LOCKOUT: &str = "brute_force_lockout";
    pub const SUSPICIOUS_IP_DETECTED: &str = "suspicious_ip_detected";
    pub const DECRYPTION_FAILED: &str = "decryption_failed";
    pub const ENCRYPTION_KEY_MISSING: &str = "encryption_key_missing";
}

/// 文本列宽（字符数），与 migrations 中的 VARCHAR 定义一致
pub mod column_limits {
    pub const IP_ADDRESS: usize = 64;
    pub const EVENT_TYPE: usize = 64;
    pub const METHOD: usize = 16;
    pub const NAME: usize = 128;
    pub const LABEL: usize = 255;
}

/// 按字符截断到列宽，超长时保留前缀
pub fn clip(value: impl Into<String>, max_chars: usize) -> String {
    let value = value.into();
    match value.char_indices().nth(max_chars) {
        Some((end, _)) => value[..end].to_string(),
        None => value,
    }
}

// ============ 记录 ============

/// 通用操作审计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    /// 会话 ID 的 SHA-256 前缀，可关联但不可重放
    pub session_ref: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub method: Option<String>,
    pub endpoint: Option<String>,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error_message: Option<String>,
    pub request_data: Option<StructuredValue>,
    pub response_data: Option<StructuredValue>,
    pub duration_ms: Option<i64>,
    pub severity: Severity,
    pub category: Category,
    pub metadata: Metadata,
}

/// 安全事件（风险分 0-100）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub severity: Severity,
    pub description: String,
    pub details: Metadata,
    pub risk_score: u8,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub actions: Vec<String>,
}

impl SecurityEvent {
    /// details 中的登录标识（失败计数回退路径按此匹配）
    pub fn identifier(&self) -> Option<&str> {
        self.details.get("identifier").and_then(StructuredValue::as_str)
    }
}

/// 合规数据访问记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataAccessLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Uuid,
    pub table_name: String,
    pub record_id: String,
    pub operation: DataOperation,
    pub fields_accessed: Vec<String>,
    pub old_values: Metadata,
    pub new_values: Metadata,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub purpose: String,
}

/// 管理员特权操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub admin_id: Uuid,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub description: String,
    pub details: Metadata,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// 持久化单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Action(AuditLog),
    Security(SecurityEvent),
    DataAccess(DataAccessLog),
    Admin(AdminAction),
}

impl AuditRecord {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Action(r) => r.id,
            Self::Security(r) => r.id,
            Self::DataAccess(r) => r.id,
            Self::Admin(r) => r.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Action(_) => "audit_log",
            Self::Security(_) => "security_event",
            Self::DataAccess(_) => "data_access_log",
            Self::Admin(_) => "admin_action",
        }
    }
}

// ============ 写入参数 ============

#[derive(Debug, Clone, Default)]
pub struct LogActionParams {
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityEventParams {
    pub event_type: String,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub description: String,
    pub details: Metadata,
    pub risk_score: u8,
    pub actions: Vec<String>,
}

impl SecurityEventParams {
    pub fn new(event_type: impl Into<String>, description: impl Into<String>, risk_score: u8) -> Self {
        Self {
            event_type: event_type.into(),
            description: description.into(),
            risk_score: risk_score.min(100),
            ..Default::default()
        }
    }

    pub fn ip(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.filter(|s| !s.is_empty()).map(str::to_string);
        self
    }

    pub fn user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = user_agent.filter(|s| !s.is_empty()).map(str::to_string);
        self
    }

    pub fn user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<StructuredValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn action_taken(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct DataAccessParams {
    pub user_id: Uuid,
    pub table_name: String,
    pub record_id: String,
    pub operation: DataOperation,
    pub fields_accessed: Vec<String>,
    pub old_values: Metadata,
    pub new_values: Metadata,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub purpose: String,
}

#[derive(Debug, Clone)]
pub struct AdminActionParams {
    pub admin_id: Uuid,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub description: String,
    pub details: Metadata,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

// ============ 查询 ============

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub user_id: Option<Uuid>,
    /// 子串匹配，长度 ≤ 100
    pub action: Option<String>,
    pub resource: Option<String>,
    pub severity: Option<Severity>,
    pub category: Option<Category>,
    pub success: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityEventFilter {
    pub event_type: Option<String>,
    pub severity: Option<Severity>,
    pub resolved: Option<bool>,
    pub min_risk_score: Option<u8>,
    pub ip_address: Option<String>,
    /// 匹配 details.identifier
    pub identifier: Option<String>,
    /// 严格晚于该时间
    pub since: Option<DateTime<Utc>>,
}

/// 分页结果
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// 存储层返回的原始计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditCounts {
    pub total_logs: i64,
    pub successful_actions: i64,
    pub failed_actions: i64,
    pub security_events: i64,
    pub unresolved_security_events: i64,
    pub high_risk_events: i64,
    pub unresolved_high_risk_events: i64,
    pub recent_logs_24h: i64,
    pub admin_actions: i64,
}

/// 高风险阈值（统计口径）
pub const HIGH_RISK_SCORE: u8 = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditStatistics {
    pub total_logs: i64,
    pub successful_actions: i64,
    pub failed_actions: i64,
    /// 百分比 0-100
    pub success_rate: f64,
    pub security_events: i64,
    pub unresolved_security_events: i64,
    pub high_risk_events: i64,
    pub unresolved_high_risk_events: i64,
    pub recent_logs_24h: i64,
    pub admin_actions: i64,
}

impl From<AuditCounts> for AuditStatistics {
    fn from(c: AuditCounts) -> Self {
        let success_rate = if c.total_logs > 0 {
            c.successful_actions as f64 / c.total_logs as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_logs: c.total_logs,
            successful_actions: c.successful_actions,
            failed_actions: c.failed_actions,
            success_rate,
            security_events: c.security_events,
            unresolved_security_events: c.unresolved_security_events,
            high_risk_events: c.high_risk_events,
            unresolved_high_risk_events: c.unresolved_high_risk_events,
            recent_logs_24h: c.recent_logs_24h,
            admin_actions: c.admin_actions,
        }
    }
}

/// 保留期清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub audit_logs_deleted: u64,
    pub data_access_logs_deleted: u64,
    pub security_events_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_for_action() {
        assert_eq!(Severity::for_action("delete_property", false), Severity::Medium);
        assert_eq!(Severity::for_action("DELETE_PROPERTY", true), Severity::High);
        assert_eq!(Severity::for_action("disable_user", true), Severity::High);
        assert_eq!(Severity::for_action("update_profile", true), Severity::Medium);
        assert_eq!(Severity::for_action("view_listing", true), Severity::Low);
    }

    #[test]
    fn test_clip_counts_chars() {
        assert_eq!(clip("abc", 5), "abc");
        assert_eq!(clip("a".repeat(80), column_limits::IP_ADDRESS).len(), 64);
        assert_eq!(clip("ümlaut", 2), "üm");
        assert_eq!(clip("", 0), "");
    }

    #[test]
    fn test_severity_for_status() {
        assert_eq!(Severity::for_status(503), Severity::High);
        assert_eq!(Severity::for_status(404), Severity::Medium);
        assert_eq!(Severity::for_status(201), Severity::Low);
    }

    #[test]
    fn test_severity_for_risk_score() {
        let cases = [
            (40, Severity::Medium),
            (90, Severity::Critical),
            (95, Severity::Critical),
            (85, Severity::Critical),
            (70, Severity::High),
            (30, Severity::Low),
        ];
        for (score, expected) in cases {
            assert_eq!(Severity::for_risk_score(score), expected, "score {}", score);
        }
    }

    #[test]
    fn test_category_keywords() {
        assert_eq!(Category::for_action("mfa_verify", "user"), Category::Auth);
        assert_eq!(Category::for_action("update", "admin_settings"), Category::Admin);
        assert_eq!(Category::for_action("encrypt_field", "lead"), Category::Security);
        assert_eq!(Category::for_action("update", "booking"), Category::Data);
        assert_eq!(Category::for_action("heartbeat", "worker"), Category::System);

        assert_eq!(Category::for_path("/api/v1/admin/users"), Category::Admin);
        assert_eq!(Category::for_path("/api/v1/auth/login"), Category::Auth);
        assert_eq!(Category::for_path("/api/v1/bookings/7"), Category::Data);
        assert_eq!(Category::for_path("/healthz"), Category::System);
    }

    #[test]
    fn test_statistics_success_rate() {
        let stats = AuditStatistics::from(AuditCounts {
            total_logs: 3,
            successful_actions: 2,
            failed_actions: 1,
            ..Default::default()
        });
        assert!((stats.success_rate - 66.666).abs() < 0.1);

        let empty = AuditStatistics::from(AuditCounts::default());
        assert_eq!(empty.success_rate, 0.0);
    }
}
