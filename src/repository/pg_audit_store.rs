// 审计记录 PostgreSQL 实现
//
// 表结构见 migrations/20260101000000_audit_tables.sql；结构化字段存 JSONB。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::audit_store::{AuditStore, StoreResult};
use crate::{
    domain::{
        audit::HIGH_RISK_SCORE, AdminAction, AuditCounts, AuditLog, AuditLogFilter, AuditRecord,
        Category, DataAccessLog, Metadata, Page, RetentionReport, SecurityEvent,
        SecurityEventFilter, Severity, StructuredValue,
    },
    error::PersistenceError,
};

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_audit_log(&self, r: &AuditLog) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO audit_logs
                (id, timestamp, user_id, session_ref, ip_address, user_agent, action, resource,
                 resource_id, method, endpoint, status_code, success, error_message,
                 request_data, response_data, duration_ms, severity, category, metadata)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                       $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"#,
        )
        .bind(r.id)
        .bind(r.timestamp)
        .bind(r.user_id)
        .bind(&r.session_ref)
        .bind(&r.ip_address)
        .bind(&r.user_agent)
        .bind(&r.action)
        .bind(&r.resource)
        .bind(&r.resource_id)
        .bind(&r.method)
        .bind(&r.endpoint)
        .bind(r.status_code.map(i32::from))
        .bind(r.success)
        .bind(&r.error_message)
        .bind(r.request_data.as_ref().map(Json))
        .bind(r.response_data.as_ref().map(Json))
        .bind(r.duration_ms)
        .bind(r.severity.as_str())
        .bind(r.category.as_str())
        .bind(Json(&r.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_security_event(&self, r: &SecurityEvent) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO security_events
                (id, timestamp, event_type, user_id, ip_address, user_agent, severity,
                 description, details, risk_score, resolved, resolved_at, resolved_by, actions)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(r.id)
        .bind(r.timestamp)
        .bind(&r.event_type)
        .bind(r.user_id)
        .bind(&r.ip_address)
        .bind(&r.user_agent)
        .bind(r.severity.as_str())
        .bind(&r.description)
        .bind(Json(&r.details))
        .bind(i16::from(r.risk_score))
        .bind(r.resolved)
        .bind(r.resolved_at)
        .bind(r.resolved_by)
        .bind(Json(&r.actions))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_data_access(&self, r: &DataAccessLog) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO data_access_logs
                (id, timestamp, user_id, table_name, record_id, operation, fields_accessed,
                 old_values, new_values, ip_address, user_agent, purpose)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(r.id)
        .bind(r.timestamp)
        .bind(r.user_id)
        .bind(&r.table_name)
        .bind(&r.record_id)
        .bind(r.operation.as_str())
        .bind(Json(&r.fields_accessed))
        .bind(Json(&r.old_values))
        .bind(Json(&r.new_values))
        .bind(&r.ip_address)
        .bind(&r.user_agent)
        .bind(&r.purpose)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_admin_action(&self, r: &AdminAction) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO admin_actions
                (id, timestamp, admin_id, action, target_type, target_id, description,
                 details, ip_address, user_agent, success, error_message)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(r.id)
        .bind(r.timestamp)
        .bind(r.admin_id)
        .bind(&r.action)
        .bind(&r.target_type)
        .bind(&r.target_id)
        .bind(&r.description)
        .bind(Json(&r.details))
        .bind(&r.ip_address)
        .bind(&r.user_agent)
        .bind(r.success)
        .bind(&r.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AuditLogRow {
    id: Uuid,
    timestamp: DateTime<Utc>,
    user_id: Option<Uuid>,
    session_ref: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    action: String,
    resource: String,
    resource_id: Option<String>,
    method: Option<String>,
    endpoint: Option<String>,
    status_code: Option<i32>,
    success: bool,
    error_message: Option<String>,
    request_data: Option<Json<StructuredValue>>,
    response_data: Option<Json<StructuredValue>>,
    duration_ms: Option<i64>,
    severity: String,
    category: String,
    metadata: Json<Metadata>,
}

impl TryFrom<AuditLogRow> for AuditLog {
    type Error = PersistenceError;

    fn try_from(r: AuditLogRow) -> Result<Self, Self::Error> {
        Ok(AuditLog {
            id: r.id,
            timestamp: r.timestamp,
            user_id: r.user_id,
            session_ref: r.session_ref,
            ip_address: r.ip_address,
            user_agent: r.user_agent,
            action: r.action,
            resource: r.resource,
            resource_id: r.resource_id,
            method: r.method,
            endpoint: r.endpoint,
            status_code: r.status_code.and_then(|c| u16::try_from(c).ok()),
            success: r.success,
            error_message: r.error_message,
            request_data: r.request_data.map(|j| j.0),
            response_data: r.response_data.map(|j| j.0),
            duration_ms: r.duration_ms,
            severity: parse_severity(&r.severity)?,
            category: Category::parse(&r.category)
                .ok_or_else(|| PersistenceError::CorruptRow(format!("category '{}'", r.category)))?,
            metadata: r.metadata.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SecurityEventRow {
    id: Uuid,
    timestamp: DateTime<Utc>,
    event_type: String,
    user_id: Option<Uuid>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    severity: String,
    description: String,
    details: Json<Metadata>,
    risk_score: i16,
    resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<Uuid>,
    actions: Json<Vec<String>>,
}

impl TryFrom<SecurityEventRow> for SecurityEvent {
    type Error = PersistenceError;

    fn try_from(r: SecurityEventRow) -> Result<Self, Self::Error> {
        Ok(SecurityEvent {
            id: r.id,
            timestamp: r.timestamp,
            event_type: r.event_type,
            user_id: r.user_id,
            ip_address: r.ip_address,
            user_agent: r.user_agent,
            severity: parse_severity(&r.severity)?,
            description: r.description,
            details: r.details.0,
            risk_score: u8::try_from(r.risk_score)
                .map_err(|_| PersistenceError::CorruptRow(format!("risk_score {}", r.risk_score)))?,
            resolved: r.resolved,
            resolved_at: r.resolved_at,
            resolved_by: r.resolved_by,
            actions: r.actions.0,
        })
    }
}

fn parse_severity(s: &str) -> Result<Severity, PersistenceError> {
    Severity::parse(s).ok_or_else(|| PersistenceError::CorruptRow(format!("severity '{}'", s)))
}

const SECURITY_EVENT_COLUMNS: &str = "id, timestamp, event_type, user_id, ip_address, user_agent, \
     severity, description, details, risk_score, resolved, resolved_at, resolved_by, actions";

// 与 SecurityEventFilter 对应的 WHERE 子句，参数 $1-$7
const SECURITY_EVENT_WHERE: &str = r#"
    WHERE ($1::TEXT IS NULL OR event_type = $1)
      AND ($2::TEXT IS NULL OR severity = $2)
      AND ($3::BOOL IS NULL OR resolved = $3)
      AND ($4::SMALLINT IS NULL OR risk_score >= $4)
      AND ($5::TEXT IS NULL OR ip_address = $5)
      AND ($6::TEXT IS NULL OR details->>'identifier' = $6)
      AND ($7::TIMESTAMPTZ IS NULL OR timestamp > $7)
"#;

// 与 AuditLogFilter 对应的 WHERE 子句，参数 $1-$9
const AUDIT_LOG_WHERE: &str = r#"
    WHERE ($1::UUID IS NULL OR user_id = $1)
      AND ($2::TEXT IS NULL OR action ILIKE '%' || $2 || '%')
      AND ($3::TEXT IS NULL OR resource = $3)
      AND ($4::TEXT IS NULL OR severity = $4)
      AND ($5::TEXT IS NULL OR category = $5)
      AND ($6::BOOL IS NULL OR success = $6)
      AND ($7::TIMESTAMPTZ IS NULL OR timestamp >= $7)
      AND ($8::TIMESTAMPTZ IS NULL OR timestamp <= $8)
      AND ($9::TEXT IS NULL OR ip_address = $9)
"#;

macro_rules! bind_security_filter {
    ($query:expr, $f:expr) => {
        $query
            .bind($f.event_type.as_deref())
            .bind($f.severity.map(|s| s.as_str()))
            .bind($f.resolved)
            .bind($f.min_risk_score.map(i16::from))
            .bind($f.ip_address.as_deref())
            .bind($f.identifier.as_deref())
            .bind($f.since)
    };
}

macro_rules! bind_audit_filter {
    ($query:expr, $f:expr) => {
        $query
            .bind($f.user_id)
            .bind($f.action.as_deref())
            .bind($f.resource.as_deref())
            .bind($f.severity.map(|s| s.as_str()))
            .bind($f.category.map(|c| c.as_str()))
            .bind($f.success)
            .bind($f.start_date)
            .bind($f.end_date)
            .bind($f.ip_address.as_deref())
    };
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, record: &AuditRecord) -> StoreResult<()> {
        match record {
            AuditRecord::Action(r) => self.insert_audit_log(r).await,
            AuditRecord::Security(r) => self.insert_security_event(r).await,
            AuditRecord::DataAccess(r) => self.insert_data_access(r).await,
            AuditRecord::Admin(r) => self.insert_admin_action(r).await,
        }
    }

    async fn query_audit_logs(
        &self,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Page<AuditLog>> {
        let count_sql = format!("SELECT COUNT(*) FROM audit_logs {}", AUDIT_LOG_WHERE);
        let total: i64 = bind_audit_filter!(sqlx::query_scalar(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let select_sql = format!(
            "SELECT * FROM audit_logs {} ORDER BY timestamp DESC LIMIT $10 OFFSET $11",
            AUDIT_LOG_WHERE
        );
        let rows: Vec<AuditLogRow> = bind_audit_filter!(sqlx::query_as(&select_sql), filter)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(AuditLog::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { items, total })
    }

    async fn query_security_events(
        &self,
        filter: &SecurityEventFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Page<SecurityEvent>> {
        let total = self.count_security_events(filter).await?;

        let select_sql = format!(
            "SELECT {} FROM security_events {} ORDER BY timestamp DESC LIMIT $8 OFFSET $9",
            SECURITY_EVENT_COLUMNS, SECURITY_EVENT_WHERE
        );
        let rows: Vec<SecurityEventRow> =
            bind_security_filter!(sqlx::query_as(&select_sql), filter)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

        let items = rows
            .into_iter()
            .map(SecurityEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { items, total })
    }

    async fn count_security_events(&self, filter: &SecurityEventFilter) -> StoreResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM security_events {}", SECURITY_EVENT_WHERE);
        let total: i64 = bind_security_filter!(sqlx::query_scalar(&sql), filter)
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn latest_security_event(
        &self,
        filter: &SecurityEventFilter,
    ) -> StoreResult<Option<SecurityEvent>> {
        let sql = format!(
            "SELECT {} FROM security_events {} ORDER BY timestamp DESC LIMIT 1",
            SECURITY_EVENT_COLUMNS, SECURITY_EVENT_WHERE
        );
        let row: Option<SecurityEventRow> = bind_security_filter!(sqlx::query_as(&sql), filter)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SecurityEvent::try_from).transpose()
    }

    async fn counts(&self, now: DateTime<Utc>) -> StoreResult<AuditCounts> {
        let since = now - Duration::hours(24);
        let high_risk = i16::from(HIGH_RISK_SCORE);

        let (total_logs, successful_actions, failed_actions, recent_logs_24h): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"SELECT COUNT(*),
                          COUNT(*) FILTER (WHERE success),
                          COUNT(*) FILTER (WHERE NOT success),
                          COUNT(*) FILTER (WHERE timestamp > $1)
                   FROM audit_logs"#,
            )
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        let (security_events, unresolved_security_events, high_risk_events, unresolved_high_risk_events): (
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COUNT(*) FILTER (WHERE NOT resolved),
                      COUNT(*) FILTER (WHERE risk_score >= $1),
                      COUNT(*) FILTER (WHERE NOT resolved AND risk_score >= $1)
               FROM security_events"#,
        )
        .bind(high_risk)
        .fetch_one(&self.pool)
        .await?;

        let admin_actions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_actions")
            .fetch_one(&self.pool)
            .await?;

        Ok(AuditCounts {
            total_logs,
            successful_actions,
            failed_actions,
            security_events,
            unresolved_security_events,
            high_risk_events,
            unresolved_high_risk_events,
            recent_logs_24h,
            admin_actions,
        })
    }

    async fn resolve_security_event(
        &self,
        id: Uuid,
        resolved_by: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE security_events
               SET resolved = TRUE, resolved_at = $2, resolved_by = $3
               WHERE id = $1 AND resolved = FALSE"#,
        )
        .bind(id)
        .bind(resolved_at)
        .bind(resolved_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_before(
        &self,
        log_cutoff: DateTime<Utc>,
        security_cutoff: DateTime<Utc>,
    ) -> StoreResult<RetentionReport> {
        let mut tx = self.pool.begin().await?;

        let audit_logs_deleted = sqlx::query("DELETE FROM audit_logs WHERE timestamp < $1")
            .bind(log_cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let data_access_logs_deleted =
            sqlx::query("DELETE FROM data_access_logs WHERE timestamp < $1")
                .bind(log_cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        let security_events_deleted =
            sqlx::query("DELETE FROM security_events WHERE timestamp < $1 AND resolved = TRUE")
                .bind(security_cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        tx.commit().await?;

        Ok(RetentionReport {
            audit_logs_deleted,
            data_access_logs_deleted,
            security_events_deleted,
        })
    }
}
