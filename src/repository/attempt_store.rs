// 登录失败计数 / 锁定标记存储
//
// 三种实现满足同一契约：
// - RedisAttemptStore：原子计数，快速路径
// - AuditAttemptStore：从安全事件表推导，数据库回退路径（非原子）
// - MemoryAttemptStore：进程内，测试与单机开发

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use super::audit_store::StoreResult;
use crate::domain::SecurityEvent;

/// 单个标识的计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptSnapshot {
    /// 当前窗口内失败次数
    pub attempts: u32,
    /// 计数窗口剩余时间
    pub window_remaining: Option<Duration>,
    /// 锁定剩余时间
    pub lockout_remaining: Option<Duration>,
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// 后端名称（日志用）
    fn backend(&self) -> &'static str;

    /// 锁定剩余时间；未锁定返回 None
    async fn lockout_remaining(&self, identifier: &str) -> StoreResult<Option<Duration>>;

    /// 当前窗口内的失败次数
    async fn failure_count(&self, identifier: &str, window: Duration) -> StoreResult<u32>;

    /// 记一次失败并刷新窗口，返回计数后的值（单次原子操作）
    async fn record_failure(&self, identifier: &str, window: Duration) -> StoreResult<u32>;

    /// 从审计事件推导计数的实现返回 true：失败事件由 `record_failure_event` 写入
    fn persists_failure_events(&self) -> bool {
        false
    }

    /// 记一次失败，`event` 为对应的 login_failure 事件
    ///
    /// 默认只计数，事件由调用方经审计日志尽力写入。
    /// `persists_failure_events` 为 true 的实现必须先写入事件，写入失败时返回错误。
    async fn record_failure_event(
        &self,
        identifier: &str,
        _event: &SecurityEvent,
        window: Duration,
    ) -> StoreResult<u32> {
        self.record_failure(identifier, window).await
    }

    /// 进入锁定并清空计数
    ///
    /// 已处于锁定时不重置计时，返回 false；本次调用建立锁定返回 true。
    async fn lock(&self, identifier: &str, duration: Duration) -> StoreResult<bool>;

    /// 登录成功：删除计数与锁定标记
    async fn reset(&self, identifier: &str) -> StoreResult<()>;

    async fn is_ip_flagged(&self, ip: &str) -> StoreResult<bool>;

    async fn flag_ip(&self, ip: &str, ttl: Duration) -> StoreResult<()>;

    async fn attempt_stats(&self, identifier: &str, window: Duration)
        -> StoreResult<AttemptSnapshot>;
}

// ============ 内存实现 ============

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u32,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    counters: HashMap<String, Counter>,
    lockouts: HashMap<String, Instant>,
    flagged_ips: HashMap<String, Instant>,
}

/// 进程内实现；单个互斥锁保证计数原子，不跨 await 持有
#[derive(Default)]
pub struct MemoryAttemptStore {
    state: Mutex<State>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State, Instant) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        state.counters.retain(|_, c| c.expires_at > now);
        state.lockouts.retain(|_, until| *until > now);
        state.flagged_ips.retain(|_, until| *until > now);
        f(&mut state, now)
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn lockout_remaining(&self, identifier: &str) -> StoreResult<Option<Duration>> {
        Ok(self.with_state(|s, now| {
            s.lockouts
                .get(identifier)
                .map(|until| until.saturating_duration_since(now))
        }))
    }

    async fn failure_count(&self, identifier: &str, _window: Duration) -> StoreResult<u32> {
        Ok(self.with_state(|s, _| s.counters.get(identifier).map_or(0, |c| c.count)))
    }

    async fn record_failure(&self, identifier: &str, window: Duration) -> StoreResult<u32> {
        Ok(self.with_state(|s, now| {
            let counter = s.counters.entry(identifier.to_string()).or_insert(Counter {
                count: 0,
                expires_at: now,
            });
            counter.count += 1;
            counter.expires_at = now + window;
            counter.count
        }))
    }

    async fn lock(&self, identifier: &str, duration: Duration) -> StoreResult<bool> {
        Ok(self.with_state(|s, now| {
            s.counters.remove(identifier);
            if s.lockouts.contains_key(identifier) {
                return false;
            }
            s.lockouts.insert(identifier.to_string(), now + duration);
            true
        }))
    }

    async fn reset(&self, identifier: &str) -> StoreResult<()> {
        self.with_state(|s, _| {
            s.counters.remove(identifier);
            s.lockouts.remove(identifier);
        });
        Ok(())
    }

    async fn is_ip_flagged(&self, ip: &str) -> StoreResult<bool> {
        Ok(self.with_state(|s, _| s.flagged_ips.contains_key(ip)))
    }

    async fn flag_ip(&self, ip: &str, ttl: Duration) -> StoreResult<()> {
        self.with_state(|s, now| {
            s.flagged_ips.insert(ip.to_string(), now + ttl);
        });
        Ok(())
    }

    async fn attempt_stats(
        &self,
        identifier: &str,
        _window: Duration,
    ) -> StoreResult<AttemptSnapshot> {
        Ok(self.with_state(|s, now| {
            let counter = s.counters.get(identifier);
            AttemptSnapshot {
                attempts: counter.map_or(0, |c| c.count),
                window_remaining: counter.map(|c| c.expires_at.saturating_duration_since(now)),
                lockout_remaining: s
                    .lockouts
                    .get(identifier)
                    .map(|until| until.saturating_duration_since(now)),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(900);

    #[tokio::test]
    async fn test_counter_and_lock() {
        let store = MemoryAttemptStore::new();
        assert_eq!(store.record_failure("alice", WINDOW).await.unwrap(), 1);
        assert_eq!(store.record_failure("alice", WINDOW).await.unwrap(), 2);
        assert_eq!(store.failure_count("alice", WINDOW).await.unwrap(), 2);

        assert!(store.lock("alice", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.failure_count("alice", WINDOW).await.unwrap(), 0);
        // 重复锁定不延长计时
        assert!(!store.lock("alice", Duration::from_secs(600)).await.unwrap());
        let remaining = store.lockout_remaining("alice").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(55));

        store.reset("alice").await.unwrap();
        assert!(store.lockout_remaining("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryAttemptStore::new();
        store
            .record_failure("bob", Duration::from_millis(20))
            .await
            .unwrap();
        store.flag_ip("10.0.0.1", Duration::from_millis(20)).await.unwrap();
        assert!(store.is_ip_flagged("10.0.0.1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.failure_count("bob", WINDOW).await.unwrap(), 0);
        assert!(!store.is_ip_flagged("10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_failures_counted_once_each() {
        let store = std::sync::Arc::new(MemoryAttemptStore::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.record_failure("carol", WINDOW).await.unwrap()
            }));
        }
        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=20).collect::<Vec<u32>>());
    }
}
