//! 登录暴力破解防护
//!
//! 每个标识的状态机：Open（失败数 < max）→ Locked（失败数达到 max，启动锁定计时并清空计数）
//! → 锁定到期自动回到 Open。登录成功是唯一的手动解除方式。
//!
//! 计数存储通过 [`AttemptStore`] 在构造时选定；每次锁定、拦截、可疑 IP 标记
//! 都会经 [`AuditLogger`] 产生安全事件。所有存储调用都受 `store_timeout` 限制，
//! 超时立即失败，不阻塞登录请求。

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::BruteForceConfig,
    domain::{
        audit::{clip, column_limits, event_types},
        SecurityEventParams,
    },
    error::{GuardError, PersistenceError, RateLimitError},
    infrastructure::log_sanitizer::mask_identifier,
    repository::{AttemptStore, StoreResult},
    service::audit_service::AuditLogger,
};

const RISK_LOGIN_FAILURE: u8 = 60;
const RISK_BLOCKED: u8 = 90;
const RISK_LOCKOUT: u8 = 95;
const RISK_SUSPICIOUS_IP: u8 = 85;

/// 登录前检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginCheck {
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub retry_after: Option<Duration>,
}

/// 记录失败后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureOutcome {
    /// 本次失败在当前窗口中的序号；锁定期间的失败不计数，为 None
    pub attempt_number: Option<u32>,
    pub locked_out: bool,
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptStats {
    pub attempts: u32,
    pub max_attempts: u32,
    pub window_ends_at: Option<DateTime<Utc>>,
    pub locked_for: Option<Duration>,
}

pub struct BruteForceGuard {
    store: Arc<dyn AttemptStore>,
    audit: Arc<AuditLogger>,
    config: BruteForceConfig,
}

impl BruteForceGuard {
    pub fn new(store: Arc<dyn AttemptStore>, audit: Arc<AuditLogger>, config: BruteForceConfig) -> Self {
        tracing::info!(
            backend = store.backend(),
            max_attempts = config.max_attempts,
            lockout_secs = config.lockout_secs,
            "Brute-force guard initialized"
        );
        Self { store, audit, config }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// 登录前检查
    ///
    /// 已锁定 → 拒绝并记录 brute_force_blocked；
    /// 窗口内失败数已达上限 → 进入锁定并记录 brute_force_lockout。
    pub async fn check_login_attempt(
        &self,
        identifier: &str,
        ip: Option<&str>,
    ) -> Result<LoginCheck, PersistenceError> {
        let identifier = normalize_identifier(identifier);
        let ip = ip.map(normalize_ip);
        let ip = ip.as_deref();

        if let Some(remaining) = self.timed(self.store.lockout_remaining(&identifier)).await? {
            self.audit
                .log_security_event(
                    SecurityEventParams::new(
                        event_types::BRUTE_FORCE_BLOCKED,
                        format!(
                            "Login attempt blocked due to account lockout: {}",
                            mask_identifier(&identifier)
                        ),
                        RISK_BLOCKED,
                    )
                    .ip(ip)
                    .detail("identifier", identifier.as_str())
                    .detail("retry_after_secs", remaining.as_secs())
                    .action_taken("login_blocked"),
                )
                .await;
            return Ok(LoginCheck {
                allowed: false,
                remaining_attempts: 0,
                retry_after: Some(remaining),
            });
        }

        let attempts = self
            .timed(self.store.failure_count(&identifier, self.config.attempt_window()))
            .await?;
        if attempts >= self.config.max_attempts {
            let retry_after = self.lock_out(&identifier, attempts, ip).await?;
            return Ok(LoginCheck {
                allowed: false,
                remaining_attempts: 0,
                retry_after: Some(retry_after),
            });
        }

        Ok(LoginCheck {
            allowed: true,
            remaining_attempts: self.config.max_attempts - attempts,
            retry_after: None,
        })
    }

    /// 登录前检查，拒绝时返回类型化的限流错误
    pub async fn ensure_login_allowed(
        &self,
        identifier: &str,
        ip: Option<&str>,
    ) -> Result<u32, GuardError> {
        let check = self.check_login_attempt(identifier, ip).await?;
        if check.allowed {
            return Ok(check.remaining_attempts);
        }
        Err(RateLimitError::Locked {
            retry_after: check.retry_after.unwrap_or_else(|| self.config.lockout_duration()),
        }
        .into())
    }

    /// 记录一次登录失败
    ///
    /// login_failure 事件总会写入：计数由审计事件推导的存储在计数前同步写入并传播写入错误，
    /// 其他存储经审计日志尽力写入。锁定期间的失败只记录不计数；达到上限立即锁定。
    pub async fn record_failed_attempt(
        &self,
        identifier: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<FailureOutcome, PersistenceError> {
        let identifier = normalize_identifier(identifier);
        let ip = ip.map(normalize_ip);
        let ip = ip.as_deref();

        let event = self.audit.prepare_security_event(
            SecurityEventParams::new(
                event_types::LOGIN_FAILURE,
                format!("Failed login attempt for: {}", mask_identifier(&identifier)),
                RISK_LOGIN_FAILURE,
            )
            .ip(ip)
            .user_agent(user_agent)
            .detail("identifier", identifier.as_str()),
        );
        let store_persists = self.store.persists_failure_events();
        if !store_persists {
            self.audit.persist_security_event(event.clone()).await;
        }

        if let Some(remaining) = self.timed(self.store.lockout_remaining(&identifier)).await? {
            if store_persists {
                self.audit.persist_security_event(event).await;
            }
            return Ok(FailureOutcome {
                attempt_number: None,
                locked_out: true,
                retry_after: Some(remaining),
            });
        }

        let attempts = self
            .timed(self.store.record_failure_event(
                &identifier,
                &event,
                self.config.attempt_window(),
            ))
            .await?;
        tracing::debug!(
            identifier = %mask_identifier(&identifier),
            attempts,
            max_attempts = self.config.max_attempts,
            "Login failure recorded"
        );

        if attempts >= self.config.max_attempts {
            let retry_after = self.lock_out(&identifier, attempts, ip).await?;
            return Ok(FailureOutcome {
                attempt_number: Some(attempts),
                locked_out: true,
                retry_after: Some(retry_after),
            });
        }

        Ok(FailureOutcome {
            attempt_number: Some(attempts),
            locked_out: false,
            retry_after: None,
        })
    }

    /// 登录成功：清空计数与锁定
    pub async fn record_successful_login(
        &self,
        identifier: &str,
        ip: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let identifier = normalize_identifier(identifier);
        let ip = ip.map(normalize_ip);
        let ip = ip.as_deref();
        self.timed(self.store.reset(&identifier)).await?;

        // 数据库回退路径以该事件作为重置标记
        self.audit
            .log_security_event(
                SecurityEventParams::new(
                    event_types::LOGIN_SUCCESS,
                    format!("Successful login for: {}", mask_identifier(&identifier)),
                    0,
                )
                .ip(ip)
                .detail("identifier", identifier.as_str()),
            )
            .await;
        Ok(())
    }

    pub async fn is_ip_suspicious(&self, ip: &str) -> Result<bool, PersistenceError> {
        self.timed(self.store.is_ip_flagged(&normalize_ip(ip))).await
    }

    /// 标记可疑 IP（ttl 内有效）并记录安全事件
    pub async fn mark_ip_suspicious(&self, ip: &str, ttl: Duration) -> Result<(), PersistenceError> {
        let ip = normalize_ip(ip);
        let ip = ip.as_str();
        self.timed(self.store.flag_ip(ip, ttl)).await?;

        tracing::warn!(ip, ttl_secs = ttl.as_secs(), "IP marked as suspicious");
        self.audit
            .log_security_event(
                SecurityEventParams::new(
                    event_types::SUSPICIOUS_IP_DETECTED,
                    "IP address marked as suspicious",
                    RISK_SUSPICIOUS_IP,
                )
                .ip(Some(ip))
                .detail("ttl_secs", ttl.as_secs())
                .action_taken("ip_flagged"),
            )
            .await;
        Ok(())
    }

    pub async fn get_attempt_stats(&self, identifier: &str) -> Result<AttemptStats, PersistenceError> {
        let identifier = normalize_identifier(identifier);
        let snapshot = self
            .timed(self.store.attempt_stats(&identifier, self.config.attempt_window()))
            .await?;

        let now = Utc::now();
        Ok(AttemptStats {
            attempts: snapshot.attempts,
            max_attempts: self.config.max_attempts,
            window_ends_at: snapshot
                .window_remaining
                .filter(|_| snapshot.attempts > 0)
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| now + d),
            locked_for: snapshot.lockout_remaining,
        })
    }

    /// 进入锁定并记录 brute_force_lockout，返回锁定剩余时间
    ///
    /// 并发请求已建立锁定时沿用其计时，不重复记录事件。
    async fn lock_out(
        &self,
        identifier: &str,
        attempts: u32,
        ip: Option<&str>,
    ) -> Result<Duration, PersistenceError> {
        let duration = self.config.lockout_duration();
        if !self.timed(self.store.lock(identifier, duration)).await? {
            let remaining = self.timed(self.store.lockout_remaining(identifier)).await?;
            return Ok(remaining.unwrap_or(duration));
        }

        tracing::warn!(
            identifier = %mask_identifier(identifier),
            attempts,
            lockout_secs = duration.as_secs(),
            backend = self.store.backend(),
            "Account locked after repeated login failures"
        );
        self.audit
            .log_security_event(
                SecurityEventParams::new(
                    event_types::BRUTE_FORCE_LOCKOUT,
                    format!(
                        "Account locked due to too many failed login attempts: {}",
                        mask_identifier(identifier)
                    ),
                    RISK_LOCKOUT,
                )
                .ip(ip)
                .detail("identifier", identifier)
                .detail("attempts", attempts)
                .detail("lockout_secs", duration.as_secs())
                .action_taken("account_locked"),
            )
            .await;
        Ok(duration)
    }

    async fn timed<T, F>(&self, op: F) -> Result<T, PersistenceError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let limit = self.config.store_timeout();
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(backend = self.store.backend(), timeout_ms = self.config.store_timeout_ms, "Attempt store call timed out");
                Err(PersistenceError::Timeout(limit))
            }
        }
    }
}

/// 标识规范化：去首尾空白并转小写
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// IP 规范化：去首尾空白并截断到审计列宽，写入与查询使用同一个值
pub fn normalize_ip(ip: &str) -> String {
    clip(ip.trim(), column_limits::IP_ADDRESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AuditConfig,
        domain::SecurityEventFilter,
        repository::{AuditStore, MemoryAttemptStore, MemoryAuditStore},
    };

    fn config() -> BruteForceConfig {
        BruteForceConfig {
            max_attempts: 3,
            lockout_secs: 60,
            window_secs: 60,
            suspicious_ip_threshold: 3,
            suspicious_ip_window_secs: 3600,
            suspicious_ip_min_risk: 80,
            store_timeout_ms: 500,
        }
    }

    fn guard() -> (BruteForceGuard, Arc<MemoryAuditStore>) {
        let audit_store = Arc::new(MemoryAuditStore::new());
        let audit = Arc::new(AuditLogger::new(
            audit_store.clone(),
            AuditConfig {
                retention_days: 90,
                security_retention_multiplier: 2,
            },
        ));
        let guard = BruteForceGuard::new(Arc::new(MemoryAttemptStore::new()), audit, config());
        (guard, audit_store)
    }

    async fn count_events(store: &MemoryAuditStore, event_type: &str) -> i64 {
        store
            .count_security_events(&SecurityEventFilter {
                event_type: Some(event_type.to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_identifier_is_normalized() {
        let (guard, _) = guard();
        guard.record_failed_attempt(" Alice@Example.com ", None, None).await.unwrap();
        let outcome = guard.record_failed_attempt("alice@example.com", None, None).await.unwrap();
        assert_eq!(outcome.attempt_number, Some(2));
    }

    #[tokio::test]
    async fn test_lockout_emits_events() {
        let (guard, audit) = guard();
        for _ in 0..3 {
            guard.record_failed_attempt("bob", Some("10.1.1.1"), None).await.unwrap();
        }
        assert_eq!(count_events(&audit, event_types::LOGIN_FAILURE).await, 3);
        assert_eq!(count_events(&audit, event_types::BRUTE_FORCE_LOCKOUT).await, 1);

        let check = guard.check_login_attempt("bob", Some("10.1.1.1")).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.remaining_attempts, 0);
        assert_eq!(count_events(&audit, event_types::BRUTE_FORCE_BLOCKED).await, 1);

        let lockout = audit
            .latest_security_event(&SecurityEventFilter {
                event_type: Some(event_types::BRUTE_FORCE_LOCKOUT.to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert!(lockout.risk_score >= 85);
        assert_eq!(lockout.identifier(), Some("bob"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_lock_out_once() {
        let attempts = Arc::new(MemoryAttemptStore::new());
        let audit_store = Arc::new(MemoryAuditStore::new());
        let audit = Arc::new(AuditLogger::new(
            audit_store.clone(),
            AuditConfig {
                retention_days: 90,
                security_retention_multiplier: 2,
            },
        ));
        let guard = Arc::new(BruteForceGuard::new(attempts.clone(), audit, config()));

        // 计数已达上限但尚未锁定
        for _ in 0..3 {
            attempts.record_failure("erin", Duration::from_secs(60)).await.unwrap();
        }

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.check_login_attempt("erin", None).await })
            })
            .collect();
        let mut rejected = 0;
        for handle in handles {
            let check = handle.await.unwrap().unwrap();
            if let Some(retry_after) = check.retry_after {
                assert!(retry_after <= Duration::from_secs(60));
                rejected += 1;
            }
        }
        assert!(rejected >= 1);

        assert_eq!(count_events(&audit_store, event_types::BRUTE_FORCE_LOCKOUT).await, 1);
    }

    #[tokio::test]
    async fn test_failures_while_locked_are_not_counted() {
        let (guard, _) = guard();
        for _ in 0..3 {
            guard.record_failed_attempt("carol", None, None).await.unwrap();
        }
        let outcome = guard.record_failed_attempt("carol", None, None).await.unwrap();
        assert!(outcome.locked_out);
        assert_eq!(outcome.attempt_number, None);

        let stats = guard.get_attempt_stats("carol").await.unwrap();
        assert_eq!(stats.attempts, 0);
        assert!(stats.locked_for.is_some());
    }

    #[tokio::test]
    async fn test_ensure_login_allowed() {
        let (guard, _) = guard();
        assert_eq!(guard.ensure_login_allowed("dan", None).await.unwrap(), 3);
        for _ in 0..3 {
            guard.record_failed_attempt("dan", None, None).await.unwrap();
        }
        let err = guard.ensure_login_allowed("dan", None).await.unwrap_err();
        match err {
            GuardError::RateLimited(RateLimitError::Locked { retry_after }) => {
                assert!(retry_after <= Duration::from_secs(60));
                assert!(retry_after > Duration::from_secs(50));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mark_ip_suspicious() {
        let (guard, audit) = guard();
        assert!(!guard.is_ip_suspicious("203.0.113.5").await.unwrap());
        guard
            .mark_ip_suspicious("203.0.113.5", Duration::from_secs(600))
            .await
            .unwrap();
        assert!(guard.is_ip_suspicious("203.0.113.5").await.unwrap());
        assert_eq!(count_events(&audit, event_types::SUSPICIOUS_IP_DETECTED).await, 1);
    }
}
