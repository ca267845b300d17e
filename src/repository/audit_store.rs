// 审计数据访问 Repository

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    domain::{
        AdminAction, AuditCounts, AuditLog, AuditLogFilter, AuditRecord, DataAccessLog, Page,
        RetentionReport, SecurityEvent, SecurityEventFilter,
    },
    domain::audit::HIGH_RISK_SCORE,
    error::PersistenceError,
};

pub type StoreResult<T> = Result<T, PersistenceError>;

// ============ Repository Trait ============

/// 审计记录存储（只追加）
///
/// 除保留期清理外，唯一允许的修改是 SecurityEvent 的 resolved 三个字段。
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// 写入一条记录
    async fn insert(&self, record: &AuditRecord) -> StoreResult<()>;

    /// 按条件分页查询操作审计（按时间倒序）
    async fn query_audit_logs(
        &self,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Page<AuditLog>>;

    /// 按条件分页查询安全事件（按时间倒序）
    async fn query_security_events(
        &self,
        filter: &SecurityEventFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Page<SecurityEvent>>;

    /// 满足条件的安全事件数量
    async fn count_security_events(&self, filter: &SecurityEventFilter) -> StoreResult<i64>;

    /// 满足条件的最新一条安全事件
    async fn latest_security_event(
        &self,
        filter: &SecurityEventFilter,
    ) -> StoreResult<Option<SecurityEvent>>;

    /// 统计用聚合计数
    async fn counts(&self, now: DateTime<Utc>) -> StoreResult<AuditCounts>;

    /// 标记安全事件已处理；事件不存在或已处理返回 false，保留首次处理人
    async fn resolve_security_event(
        &self,
        id: Uuid,
        resolved_by: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// 删除过期记录
    ///
    /// 操作审计与数据访问记录早于 `log_cutoff` 删除；安全事件仅在已处理且早于
    /// `security_cutoff` 时删除；管理员操作不清理。
    async fn delete_before(
        &self,
        log_cutoff: DateTime<Utc>,
        security_cutoff: DateTime<Utc>,
    ) -> StoreResult<RetentionReport>;
}

// ============ 内存实现 ============

#[derive(Default)]
struct Tables {
    audit_logs: Vec<AuditLog>,
    security_events: Vec<SecurityEvent>,
    data_access_logs: Vec<DataAccessLog>,
    admin_actions: Vec<AdminAction>,
}

/// 进程内实现（测试与单机开发）
#[derive(Default)]
pub struct MemoryAuditStore {
    tables: RwLock<Tables>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部数据访问记录（测试断言用）
    pub fn data_access_logs(&self) -> Vec<DataAccessLog> {
        self.read().data_access_logs.clone()
    }

    /// 全部管理员操作记录
    pub fn admin_actions(&self) -> Vec<AdminAction> {
        self.read().admin_actions.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn paginate<T: Clone>(mut items: Vec<T>, limit: i64, offset: i64) -> Page<T> {
    let total = items.len() as i64;
    let offset = offset.max(0) as usize;
    let limit = limit.max(0) as usize;
    let items = if offset >= items.len() {
        Vec::new()
    } else {
        items.drain(offset..).take(limit).collect()
    };
    Page { items, total }
}

pub(crate) fn audit_log_matches(log: &AuditLog, filter: &AuditLogFilter) -> bool {
    filter.user_id.map_or(true, |u| log.user_id == Some(u))
        && filter.action.as_deref().map_or(true, |a| {
            log.action.to_lowercase().contains(&a.to_lowercase())
        })
        && filter.resource.as_deref().map_or(true, |r| log.resource == r)
        && filter.severity.map_or(true, |s| log.severity == s)
        && filter.category.map_or(true, |c| log.category == c)
        && filter.success.map_or(true, |s| log.success == s)
        && filter.start_date.map_or(true, |d| log.timestamp >= d)
        && filter.end_date.map_or(true, |d| log.timestamp <= d)
        && filter
            .ip_address
            .as_deref()
            .map_or(true, |ip| log.ip_address.as_deref() == Some(ip))
}

pub(crate) fn security_event_matches(event: &SecurityEvent, filter: &SecurityEventFilter) -> bool {
    filter
        .event_type
        .as_deref()
        .map_or(true, |t| event.event_type == t)
        && filter.severity.map_or(true, |s| event.severity == s)
        && filter.resolved.map_or(true, |r| event.resolved == r)
        && filter.min_risk_score.map_or(true, |m| event.risk_score >= m)
        && filter
            .ip_address
            .as_deref()
            .map_or(true, |ip| event.ip_address.as_deref() == Some(ip))
        && filter
            .identifier
            .as_deref()
            .map_or(true, |id| event.identifier() == Some(id))
        && filter.since.map_or(true, |since| event.timestamp > since)
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, record: &AuditRecord) -> StoreResult<()> {
        let mut tables = self.write();
        match record.clone() {
            AuditRecord::Action(r) => tables.audit_logs.push(r),
            AuditRecord::Security(r) => tables.security_events.push(r),
            AuditRecord::DataAccess(r) => tables.data_access_logs.push(r),
            AuditRecord::Admin(r) => tables.admin_actions.push(r),
        }
        Ok(())
    }

    async fn query_audit_logs(
        &self,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Page<AuditLog>> {
        let mut matched: Vec<AuditLog> = self
            .read()
            .audit_logs
            .iter()
            .filter(|l| audit_log_matches(l, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(paginate(matched, limit, offset))
    }

    async fn query_security_events(
        &self,
        filter: &SecurityEventFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Page<SecurityEvent>> {
        let mut matched: Vec<SecurityEvent> = self
            .read()
            .security_events
            .iter()
            .filter(|e| security_event_matches(e, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(paginate(matched, limit, offset))
    }

    async fn count_security_events(&self, filter: &SecurityEventFilter) -> StoreResult<i64> {
        Ok(self
            .read()
            .security_events
            .iter()
            .filter(|e| security_event_matches(e, filter))
            .count() as i64)
    }

    async fn latest_security_event(
        &self,
        filter: &SecurityEventFilter,
    ) -> StoreResult<Option<SecurityEvent>> {
        Ok(self
            .read()
            .security_events
            .iter()
            .filter(|e| security_event_matches(e, filter))
            .max_by_key(|e| e.timestamp)
            .cloned())
    }

    async fn counts(&self, now: DateTime<Utc>) -> StoreResult<AuditCounts> {
        let tables = self.read();
        let since = now - Duration::hours(24);
        let events = &tables.security_events;
        let count = |pred: fn(&SecurityEvent) -> bool| events.iter().filter(|e| pred(e)).count() as i64;

        Ok(AuditCounts {
            total_logs: tables.audit_logs.len() as i64,
            successful_actions: tables.audit_logs.iter().filter(|l| l.success).count() as i64,
            failed_actions: tables.audit_logs.iter().filter(|l| !l.success).count() as i64,
            security_events: tables.security_events.len() as i64,
            unresolved_security_events: count(|e| !e.resolved),
            high_risk_events: count(|e| e.risk_score >= HIGH_RISK_SCORE),
            unresolved_high_risk_events: count(|e| !e.resolved && e.risk_score >= HIGH_RISK_SCORE),
            recent_logs_24h: tables
                .audit_logs
                .iter()
                .filter(|l| l.timestamp > since)
                .count() as i64,
            admin_actions: tables.admin_actions.len() as i64,
        })
    }

    async fn resolve_security_event(
        &self,
        id: Uuid,
        resolved_by: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.write();
        match tables
            .security_events
            .iter_mut()
            .find(|e| e.id == id && !e.resolved)
        {
            Some(event) => {
                event.resolved = true;
                event.resolved_at = Some(resolved_at);
                event.resolved_by = Some(resolved_by);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_before(
        &self,
        log_cutoff: DateTime<Utc>,
        security_cutoff: DateTime<Utc>,
    ) -> StoreResult<RetentionReport> {
        let mut tables = self.write();

        let before = tables.audit_logs.len();
        tables.audit_logs.retain(|l| l.timestamp >= log_cutoff);
        let audit_logs_deleted = (before - tables.audit_logs.len()) as u64;

        let before = tables.data_access_logs.len();
        tables.data_access_logs.retain(|l| l.timestamp >= log_cutoff);
        let data_access_logs_deleted = (before - tables.data_access_logs.len()) as u64;

        let before = tables.security_events.len();
        tables
            .security_events
            .retain(|e| !(e.resolved && e.timestamp < security_cutoff));
        let security_events_deleted = (before - tables.security_events.len()) as u64;

        Ok(RetentionReport {
            audit_logs_deleted,
            data_access_logs_deleted,
            security_events_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{metadata, Category, Severity, StructuredValue};

    fn event(event_type: &str, risk: u8, ip: &str, at: DateTime<Utc>) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::new_v4(),
            timestamp: at,
            event_type: event_type.to_string(),
            user_id: None,
            ip_address: Some(ip.to_string()),
            user_agent: None,
            severity: Severity::for_risk_score(risk),
            description: String::new(),
            details: metadata([("identifier", StructuredValue::from("alice@example.com"))]),
            risk_score: risk,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            actions: vec![],
        }
    }

    fn log(action: &str, success: bool, at: DateTime<Utc>) -> AuditLog {
        AuditLog {
            id: Uuid::new_v4(),
            timestamp: at,
            user_id: None,
            session_ref: None,
            ip_address: None,
            user_agent: None,
            action: action.to_string(),
            resource: "booking".to_string(),
            resource_id: None,
            method: None,
            endpoint: None,
            status_code: None,
            success,
            error_message: None,
            request_data: None,
            response_data: None,
            duration_ms: None,
            severity: Severity::for_action(action, success),
            category: Category::Data,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_resolve_keeps_first_resolver() {
        let store = MemoryAuditStore::new();
        let record = event("brute_force_lockout", 95, "1.1.1.1", Utc::now());
        let id = record.id;
        store.insert(&AuditRecord::Security(record)).await.unwrap();

        let first = Uuid::new_v4();
        let first_at = Utc::now();
        assert!(store.resolve_security_event(id, first, first_at).await.unwrap());
        assert!(!store
            .resolve_security_event(id, Uuid::new_v4(), first_at + chrono::Duration::minutes(5))
            .await
            .unwrap());

        let resolved = store
            .latest_security_event(&SecurityEventFilter::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.resolved_by, Some(first));
        assert_eq!(resolved.resolved_at, Some(first_at));
    }

    #[tokio::test]
    async fn test_security_event_filters() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();
        store
            .insert(&AuditRecord::Security(event("login_failure", 60, "1.1.1.1", now)))
            .await
            .unwrap();
        store
            .insert(&AuditRecord::Security(event("brute_force_lockout", 95, "1.1.1.1", now)))
            .await
            .unwrap();
        store
            .insert(&AuditRecord::Security(event("login_failure", 60, "2.2.2.2", now)))
            .await
            .unwrap();

        let filter = SecurityEventFilter {
            event_type: Some("login_failure".into()),
            identifier: Some("alice@example.com".into()),
            ..Default::default()
        };
        assert_eq!(store.count_security_events(&filter).await.unwrap(), 2);

        let high = SecurityEventFilter {
            min_risk_score: Some(80),
            ip_address: Some("1.1.1.1".into()),
            ..Default::default()
        };
        assert_eq!(store.count_security_events(&high).await.unwrap(), 1);

        // since 为严格晚于
        let after = SecurityEventFilter {
            since: Some(now),
            ..Default::default()
        };
        assert_eq!(store.count_security_events(&after).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pagination_and_order() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert(&AuditRecord::Action(log(
                    &format!("view_{}", i),
                    true,
                    now - Duration::minutes(i),
                )))
                .await
                .unwrap();
        }

        let page = store
            .query_audit_logs(&AuditLogFilter::default(), 2, 1)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].action, "view_1");

        let filtered = store
            .query_audit_logs(
                &AuditLogFilter {
                    action: Some("VIEW_3".into()),
                    ..Default::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);
    }

    #[tokio::test]
    async fn test_retention_rules() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();
        let old = now - Duration::days(200);

        store.insert(&AuditRecord::Action(log("view", true, old))).await.unwrap();
        store.insert(&AuditRecord::Action(log("view", true, now))).await.unwrap();

        let unresolved = event("login_failure", 60, "1.1.1.1", old);
        let resolved = event("login_failure", 60, "1.1.1.1", old);
        let resolved_id = resolved.id;
        store.insert(&AuditRecord::Security(unresolved)).await.unwrap();
        store.insert(&AuditRecord::Security(resolved)).await.unwrap();
        assert!(store
            .resolve_security_event(resolved_id, Uuid::new_v4(), now)
            .await
            .unwrap());

        let report = store
            .delete_before(now - Duration::days(90), now - Duration::days(180))
            .await
            .unwrap();
        assert_eq!(report.audit_logs_deleted, 1);
        assert_eq!(report.security_events_deleted, 1);

        let counts = store.counts(now).await.unwrap();
        assert_eq!(counts.total_logs, 1);
        assert_eq!(counts.security_events, 1);
        assert_eq!(counts.unresolved_security_events, 1);
    }
}
