//! 审计日志服务
//!
//! 四类只追加记录的写入、脱敏、分级分类，以及统计、查询、保留期清理。
//!
//! 写入为尽力而为：持久化失败记录到 `trustcore::audit_fallback` 后吞掉，
//! 绝不让审计失败中断触发它的业务操作。写入在独立任务中执行，
//! 调用方被取消时已发出的写入仍会完成。

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::AuditConfig,
    domain::{
        audit::{clip, column_limits},
        AdminAction, AdminActionParams, AuditLog, AuditLogFilter, AuditRecord, AuditStatistics,
        Category, DataAccessLog, DataAccessParams, LogActionParams, Metadata, Page,
        RetentionReport, SecurityEvent, SecurityEventFilter, SecurityEventParams, Severity,
        StructuredValue,
    },
    error::{AuditQueryError, PersistenceError},
    infrastructure::{
        log_sanitizer::{
            redact_keys_in_value, redact_sensitive_keys, sanitize_map, sanitize_string,
            sanitize_value,
        },
        logging::AUDIT_FALLBACK_TARGET,
    },
    repository::AuditStore,
    utils::request_info::HttpRequestInfo,
};

const MAX_ACTION_FILTER_LEN: usize = 100;
const MAX_PAGE_SIZE: i64 = 1000;
const SESSION_REF_LEN: usize = 16;

pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    config: AuditConfig,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>, config: AuditConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> Arc<dyn AuditStore> {
        self.store.clone()
    }

    // ============ 写入 ============

    /// 记录通用操作
    pub async fn log_action(&self, params: LogActionParams) -> Uuid {
        let record = build_action(params, redact_sensitive_keys);
        self.persist(AuditRecord::Action(record)).await
    }

    /// 记录通用操作（错误信息与元数据完整脱敏）
    pub async fn log_action_sanitized(&self, mut params: LogActionParams) -> Uuid {
        params.error_message = params.error_message.as_deref().map(sanitize_string);
        let record = build_action(params, sanitize_map);
        self.persist(AuditRecord::Action(record)).await
    }

    /// 记录 HTTP 请求；请求快照在提取时已脱敏
    pub async fn log_http_request(
        &self,
        request: &HttpRequestInfo,
        user_id: Option<Uuid>,
        session_id: Option<&str>,
        status_code: u16,
        duration: Duration,
        response_data: Option<StructuredValue>,
    ) -> Uuid {
        let response_data = response_data.map(|v| redact_keys_in_value(&v));
        self.persist(AuditRecord::Action(build_http_log(
            request,
            user_id,
            session_id,
            status_code,
            duration,
            response_data,
        )))
        .await
    }

    /// 记录 HTTP 请求（响应体完整脱敏）
    pub async fn log_http_request_sanitized(
        &self,
        request: &HttpRequestInfo,
        user_id: Option<Uuid>,
        session_id: Option<&str>,
        status_code: u16,
        duration: Duration,
        response_data: Option<StructuredValue>,
    ) -> Uuid {
        let response_data = response_data.map(|v| sanitize_value(&v));
        let mut record =
            build_http_log(request, user_id, session_id, status_code, duration, response_data);
        record.request_data = record.request_data.map(|v| sanitize_value(&v));
        self.persist(AuditRecord::Action(record)).await
    }

    /// 记录安全事件；严重级别由风险分决定
    pub async fn log_security_event(&self, params: SecurityEventParams) -> Uuid {
        let record = build_security_event(params, redact_sensitive_keys);
        self.persist(AuditRecord::Security(record)).await
    }

    /// 记录安全事件（描述与详情完整脱敏）
    pub async fn log_security_event_sanitized(&self, mut params: SecurityEventParams) -> Uuid {
        params.description = sanitize_string(&params.description);
        let record = build_security_event(params, sanitize_map);
        self.persist(AuditRecord::Security(record)).await
    }

    /// 构建安全事件（按键脱敏、截断到列宽），不写入
    ///
    /// 供需要自行持久化并感知写入失败的调用方使用。
    pub fn prepare_security_event(&self, params: SecurityEventParams) -> SecurityEvent {
        build_security_event(params, redact_sensitive_keys)
    }

    /// 尽力写入已构建的安全事件
    pub async fn persist_security_event(&self, event: SecurityEvent) -> Uuid {
        self.persist(AuditRecord::Security(event)).await
    }

    /// 记录合规数据访问
    pub async fn log_data_access(&self, params: DataAccessParams) -> Uuid {
        let record = build_data_access(params, redact_sensitive_keys);
        self.persist(AuditRecord::DataAccess(record)).await
    }

    /// 记录合规数据访问（前后值与用途完整脱敏）
    pub async fn log_data_access_sanitized(&self, mut params: DataAccessParams) -> Uuid {
        params.purpose = sanitize_string(&params.purpose);
        let record = build_data_access(params, sanitize_map);
        self.persist(AuditRecord::DataAccess(record)).await
    }

    /// 记录管理员操作
    pub async fn log_admin_action(&self, params: AdminActionParams) -> Uuid {
        let record = build_admin_action(params, redact_sensitive_keys);
        self.persist(AuditRecord::Admin(record)).await
    }

    /// 记录管理员操作（描述、错误信息、详情完整脱敏）
    pub async fn log_admin_action_sanitized(&self, mut params: AdminActionParams) -> Uuid {
        params.description = sanitize_string(&params.description);
        params.error_message = params.error_message.as_deref().map(sanitize_string);
        let record = build_admin_action(params, sanitize_map);
        self.persist(AuditRecord::Admin(record)).await
    }

    /// 写入记录并返回记录 ID
    ///
    /// 在独立任务中写入：即使调用方 future 被丢弃，写入仍会完成。
    async fn persist(&self, record: AuditRecord) -> Uuid {
        let id = record.id();
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = store.insert(&record).await {
                report_fallback(&record, &e);
            }
        });

        if let Err(e) = handle.await {
            tracing::error!(target: AUDIT_FALLBACK_TARGET, record_id = %id, error = %e, "audit write task failed");
        }
        id
    }

    // ============ 查询 ============

    /// 审计统计
    pub async fn get_audit_statistics(&self) -> Result<AuditStatistics, PersistenceError> {
        let counts = self.store.counts(Utc::now()).await?;
        Ok(AuditStatistics::from(counts))
    }

    /// 分页查询安全事件（limit 截断到 1..=1000）
    pub async fn get_security_events(
        &self,
        filter: &SecurityEventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<SecurityEvent>, PersistenceError> {
        self.store
            .query_security_events(filter, clamp_limit(limit), offset.max(0))
            .await
    }

    /// 分页查询操作审计
    ///
    /// action 过滤为子串匹配：长度不超过 100，`%` 与 `_` 会被去除。
    pub async fn get_audit_logs(
        &self,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<AuditLog>, AuditQueryError> {
        let mut filter = filter.clone();
        if let Some(action) = filter.action.take() {
            filter.action = sanitize_action_filter(&action)?;
        }
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            if start > end {
                return Err(AuditQueryError::InvalidFilter(
                    "start_date must not be after end_date".into(),
                ));
            }
        }

        Ok(self
            .store
            .query_audit_logs(&filter, clamp_limit(limit), offset.max(0))
            .await?)
    }

    /// 标记安全事件已处理；事件不存在返回 false
    pub async fn resolve_security_event(
        &self,
        event_id: Uuid,
        resolved_by: Uuid,
    ) -> Result<bool, PersistenceError> {
        let resolved = self
            .store
            .resolve_security_event(event_id, resolved_by, Utc::now())
            .await?;
        if resolved {
            tracing::info!(event_id = %event_id, resolved_by = %resolved_by, "Security event resolved");
        }
        Ok(resolved)
    }

    /// 保留期清理
    ///
    /// 操作审计与数据访问记录保留 `retention_days`；安全事件保留
    /// `retention_days * security_retention_multiplier` 且只删除已处理的；管理员操作不清理。
    pub async fn cleanup_old_logs(
        &self,
        retention_days: Option<u32>,
    ) -> Result<RetentionReport, PersistenceError> {
        let days = retention_days.unwrap_or(self.config.retention_days).max(1);
        let security_days = days.saturating_mul(self.config.security_retention_multiplier.max(1));

        let now = Utc::now();
        let log_cutoff = now - chrono::Duration::days(i64::from(days));
        let security_cutoff = now - chrono::Duration::days(i64::from(security_days));

        let report = self.store.delete_before(log_cutoff, security_cutoff).await?;
        tracing::info!(
            retention_days = days,
            audit_logs_deleted = report.audit_logs_deleted,
            data_access_logs_deleted = report.data_access_logs_deleted,
            security_events_deleted = report.security_events_deleted,
            "Audit retention sweep finished"
        );
        Ok(report)
    }
}

fn report_fallback(record: &AuditRecord, error: &PersistenceError) {
    let payload = serde_json::to_string(record)
        .unwrap_or_else(|_| format!("{{\"kind\":\"{}\",\"id\":\"{}\"}}", record.kind(), record.id()));
    tracing::error!(
        target: AUDIT_FALLBACK_TARGET,
        kind = record.kind(),
        record_id = %record.id(),
        error = %error,
        record = %payload,
        "audit record persistence failed"
    );
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_PAGE_SIZE)
}

/// 空串（去除通配符后）视为不过滤
pub fn sanitize_action_filter(action: &str) -> Result<Option<String>, AuditQueryError> {
    if action.chars().count() > MAX_ACTION_FILTER_LEN {
        return Err(AuditQueryError::InvalidFilter(format!(
            "action filter longer than {} characters",
            MAX_ACTION_FILTER_LEN
        )));
    }
    let cleaned: String = action.chars().filter(|c| *c != '%' && *c != '_').collect();
    let cleaned = cleaned.trim();
    Ok((!cleaned.is_empty()).then(|| cleaned.to_string()))
}

/// 会话 ID 不落库：存 SHA-256 前缀，可关联不可重放
fn session_ref(session_id: Option<&str>) -> Option<String> {
    session_id.filter(|s| !s.is_empty()).map(|s| {
        let digest = Sha256::digest(s.as_bytes());
        hex::encode(digest)[..SESSION_REF_LEN].to_string()
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

/// 非空且截断到列宽
fn bounded(s: Option<String>, max_chars: usize) -> Option<String> {
    non_empty(s).map(|v| clip(v, max_chars))
}

fn build_action(params: LogActionParams, redact: fn(&Metadata) -> Metadata) -> AuditLog {
    AuditLog {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        user_id: params.user_id,
        session_ref: session_ref(params.session_id.as_deref()),
        ip_address: bounded(params.ip_address, column_limits::IP_ADDRESS),
        user_agent: non_empty(params.user_agent),
        severity: Severity::for_action(&params.action, params.success),
        category: Category::for_action(&params.action, &params.resource),
        action: clip(params.action, column_limits::LABEL),
        resource: clip(params.resource, column_limits::LABEL),
        resource_id: params.resource_id.map(|v| clip(v, column_limits::LABEL)),
        method: None,
        endpoint: None,
        status_code: None,
        success: params.success,
        error_message: non_empty(params.error_message),
        request_data: None,
        response_data: None,
        duration_ms: params.duration_ms,
        metadata: redact(&params.metadata),
    }
}

fn build_http_log(
    request: &HttpRequestInfo,
    user_id: Option<Uuid>,
    session_id: Option<&str>,
    status_code: u16,
    duration: Duration,
    response_data: Option<StructuredValue>,
) -> AuditLog {
    let success = status_code < 400;
    AuditLog {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        user_id,
        session_ref: session_ref(session_id),
        ip_address: bounded(request.client_ip.clone(), column_limits::IP_ADDRESS),
        user_agent: non_empty(request.user_agent.clone()),
        action: clip(format!("{} {}", request.method, request.path), column_limits::LABEL),
        resource: clip(request.resource(), column_limits::LABEL),
        resource_id: None,
        method: Some(clip(request.method.as_str(), column_limits::METHOD)),
        endpoint: Some(request.path.clone()),
        status_code: Some(status_code),
        success,
        error_message: (!success).then(|| format!("HTTP {}", status_code)),
        request_data: Some(request.request_data.clone()),
        response_data,
        duration_ms: Some(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)),
        severity: Severity::for_status(status_code),
        category: Category::for_path(&request.path),
        metadata: Metadata::new(),
    }
}

fn build_security_event(
    params: SecurityEventParams,
    redact: fn(&Metadata) -> Metadata,
) -> SecurityEvent {
    let risk_score = params.risk_score.min(100);
    SecurityEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        event_type: clip(params.event_type, column_limits::EVENT_TYPE),
        user_id: params.user_id,
        ip_address: bounded(params.ip_address, column_limits::IP_ADDRESS),
        user_agent: non_empty(params.user_agent),
        severity: Severity::for_risk_score(risk_score),
        description: params.description,
        details: redact(&params.details),
        risk_score,
        resolved: false,
        resolved_at: None,
        resolved_by: None,
        actions: params.actions,
    }
}

fn build_data_access(params: DataAccessParams, redact: fn(&Metadata) -> Metadata) -> DataAccessLog {
    DataAccessLog {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        user_id: params.user_id,
        table_name: clip(params.table_name, column_limits::NAME),
        record_id: clip(params.record_id, column_limits::LABEL),
        operation: params.operation,
        fields_accessed: params.fields_accessed,
        old_values: redact(&params.old_values),
        new_values: redact(&params.new_values),
        ip_address: bounded(params.ip_address, column_limits::IP_ADDRESS),
        user_agent: non_empty(params.user_agent),
        purpose: params.purpose,
    }
}

fn build_admin_action(params: AdminActionParams, redact: fn(&Metadata) -> Metadata) -> AdminAction {
    AdminAction {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        admin_id: params.admin_id,
        action: clip(params.action, column_limits::LABEL),
        target_type: clip(params.target_type, column_limits::NAME),
        target_id: params.target_id.map(|v| clip(v, column_limits::LABEL)),
        description: params.description,
        details: redact(&params.details),
        ip_address: bounded(params.ip_address, column_limits::IP_ADDRESS),
        user_agent: non_empty(params.user_agent),
        success: params.success,
        error_message: non_empty(params.error_message),
    }
}
