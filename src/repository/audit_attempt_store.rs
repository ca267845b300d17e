// 登录尝试计数 数据库回退实现
//
// 不单独建表：状态从 security_events 推导。
// - 失败计数：窗口内 login_failure 事件数，起点取以下最晚者
//   （now - window、最近一次锁定到期时间、最近一次 login_success）
// - 锁定：最近一次 brute_force_lockout 事件时间 + 锁定时长
// - 可疑 IP：窗口内同一 IP 的高风险事件数 ≥ 阈值
//
// 失败事件在 record_failure_event 中同步写入，写入错误向上传播；
// lock / reset / flag_ip 为空操作，对应的安全事件由 BruteForceGuard 写入并充当标记。
//
// 先计数后判断，不是原子操作：并发请求可能同时读到阈值以下的计数，
// 高负载下实际失败次数可能略超 max_attempts。

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    attempt_store::{AttemptSnapshot, AttemptStore},
    audit_store::{AuditStore, StoreResult},
};
use crate::{
    config::BruteForceConfig,
    domain::{audit::event_types, AuditRecord, SecurityEvent, SecurityEventFilter, StructuredValue},
};

pub struct AuditAttemptStore {
    audit: Arc<dyn AuditStore>,
    config: BruteForceConfig,
}

impl AuditAttemptStore {
    pub fn new(audit: Arc<dyn AuditStore>, config: BruteForceConfig) -> Self {
        Self { audit, config }
    }

    async fn latest(&self, event_type: &str, identifier: &str) -> StoreResult<Option<SecurityEvent>> {
        self.audit
            .latest_security_event(&SecurityEventFilter {
                event_type: Some(event_type.to_string()),
                identifier: Some(identifier.to_string()),
                ..Default::default()
            })
            .await
    }

    /// 锁定事件中记录的时长；缺失时取配置
    fn lockout_duration_of(&self, event: &SecurityEvent) -> chrono::Duration {
        let secs = event
            .details
            .get("lockout_secs")
            .and_then(|v| match v {
                StructuredValue::Number(n) => n.as_u64(),
                _ => None,
            })
            .unwrap_or(self.config.lockout_secs);
        chrono::Duration::seconds(secs.min(MAX_SPAN_SECS) as i64)
    }

    /// 锁定到期时间（已被登录成功解除则返回 None）
    async fn lockout_until(&self, identifier: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let Some(lockout) = self.latest(event_types::BRUTE_FORCE_LOCKOUT, identifier).await? else {
            return Ok(None);
        };
        let success = self.latest(event_types::LOGIN_SUCCESS, identifier).await?;
        if success.is_some_and(|s| s.timestamp >= lockout.timestamp) {
            return Ok(None);
        }
        Ok(Some(lockout.timestamp + self.lockout_duration_of(&lockout)))
    }

    async fn window_start(
        &self,
        identifier: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<DateTime<Utc>> {
        let mut start = now - to_chrono(window);

        // 锁定期间的失败不计入
        if let Some(until) = self.lockout_until(identifier).await? {
            start = start.max(until.min(now));
        }
        if let Some(success) = self.latest(event_types::LOGIN_SUCCESS, identifier).await? {
            start = start.max(success.timestamp);
        }
        Ok(start)
    }

    fn failure_filter(identifier: &str, since: DateTime<Utc>) -> SecurityEventFilter {
        SecurityEventFilter {
            event_type: Some(event_types::LOGIN_FAILURE.to_string()),
            identifier: Some(identifier.to_string()),
            since: Some(since),
            ..Default::default()
        }
    }
}

// 超出 chrono 表示范围的配置按 100 年处理
const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 3600;

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d)
        .unwrap_or_else(|_| chrono::Duration::seconds(MAX_SPAN_SECS as i64))
}

fn to_std(d: chrono::Duration) -> Duration {
    d.to_std().unwrap_or(Duration::ZERO)
}

#[async_trait]
impl AttemptStore for AuditAttemptStore {
    fn backend(&self) -> &'static str {
        "database"
    }

    async fn lockout_remaining(&self, identifier: &str) -> StoreResult<Option<Duration>> {
        let now = Utc::now();
        Ok(self
            .lockout_until(identifier)
            .await?
            .filter(|until| *until > now)
            .map(|until| to_std(until - now)))
    }

    async fn failure_count(&self, identifier: &str, window: Duration) -> StoreResult<u32> {
        let start = self.window_start(identifier, window, Utc::now()).await?;
        let count = self
            .audit
            .count_security_events(&Self::failure_filter(identifier, start))
            .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// 只重新计数；失败事件经 `record_failure_event` 写入
    async fn record_failure(&self, identifier: &str, window: Duration) -> StoreResult<u32> {
        self.failure_count(identifier, window).await
    }

    fn persists_failure_events(&self) -> bool {
        true
    }

    /// 先写入失败事件再计数；写入失败直接返回错误，不能让计数悄悄停在原值
    async fn record_failure_event(
        &self,
        identifier: &str,
        event: &SecurityEvent,
        window: Duration,
    ) -> StoreResult<u32> {
        self.audit.insert(&AuditRecord::Security(event.clone())).await?;
        // 刚写入的事件至少计一次
        Ok(self.failure_count(identifier, window).await?.max(1))
    }

    /// 锁定事件由调用方写入；先计数后判断，并发时可能重复锁定
    async fn lock(&self, _identifier: &str, _duration: Duration) -> StoreResult<bool> {
        Ok(true)
    }

    async fn reset(&self, _identifier: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn is_ip_flagged(&self, ip: &str) -> StoreResult<bool> {
        let since = Utc::now() - to_chrono(self.config.suspicious_ip_window());
        let count = self
            .audit
            .count_security_events(&SecurityEventFilter {
                ip_address: Some(ip.to_string()),
                min_risk_score: Some(self.config.suspicious_ip_min_risk),
                since: Some(since),
                ..Default::default()
            })
            .await?;
        Ok(count >= i64::from(self.config.suspicious_ip_threshold))
    }

    async fn flag_ip(&self, _ip: &str, _ttl: Duration) -> StoreResult<()> {
        Ok(())
    }

    async fn attempt_stats(
        &self,
        identifier: &str,
        window: Duration,
    ) -> StoreResult<AttemptSnapshot> {
        let now = Utc::now();
        let start = self.window_start(identifier, window, now).await?;
        let filter = Self::failure_filter(identifier, start);

        let attempts = self.audit.count_security_events(&filter).await?;
        // 窗口从最近一次失败起算
        let window_remaining = self
            .audit
            .latest_security_event(&filter)
            .await?
            .map(|e| to_std(e.timestamp + to_chrono(window) - now));

        Ok(AttemptSnapshot {
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            window_remaining,
            lockout_remaining: self.lockout_remaining(identifier).await?,
        })
    }
}
