// 登录尝试计数 Redis 实现（快速路径）
//
// 键：
// - login_attempts:{identifier}  失败计数，TTL = 计数窗口
// - lockout:{identifier}         锁定标记，TTL = 锁定时长
// - suspicious_ip:{ip}           可疑 IP 标记
//
// 计数与锁定都用 MULTI/EXEC 单次往返完成，并发请求下每次失败恰好计数一次。
// 锁定标记用 SET NX：并发达到上限的请求中只有一个建立锁定，计时不会被重置。

use std::time::Duration;

use async_trait::async_trait;

use super::{
    attempt_store::{AttemptSnapshot, AttemptStore},
    audit_store::StoreResult,
};
use crate::infrastructure::cache::RedisCtx;

pub struct RedisAttemptStore {
    redis: RedisCtx,
}

impl RedisAttemptStore {
    pub fn new(redis: RedisCtx) -> Self {
        Self { redis }
    }
}

fn attempts_key(identifier: &str) -> String {
    format!("login_attempts:{}", identifier)
}

fn lockout_key(identifier: &str) -> String {
    format!("lockout:{}", identifier)
}

fn suspicious_ip_key(ip: &str) -> String {
    format!("suspicious_ip:{}", ip)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// PTTL 结果：-2 键不存在；-1 无过期时间
fn pttl_to_remaining(pttl: i64) -> Option<Duration> {
    match pttl {
        -2 => None,
        ms if ms < 0 => Some(Duration::ZERO),
        ms => Some(Duration::from_millis(ms as u64)),
    }
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn lockout_remaining(&self, identifier: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.redis.connection();
        let pttl: i64 = redis::cmd("PTTL")
            .arg(lockout_key(identifier))
            .query_async(&mut conn)
            .await?;
        Ok(pttl_to_remaining(pttl))
    }

    async fn failure_count(&self, identifier: &str, _window: Duration) -> StoreResult<u32> {
        let mut conn = self.redis.connection();
        let count: Option<u32> = redis::cmd("GET")
            .arg(attempts_key(identifier))
            .query_async(&mut conn)
            .await?;
        Ok(count.unwrap_or(0))
    }

    async fn record_failure(&self, identifier: &str, window: Duration) -> StoreResult<u32> {
        let key = attempts_key(identifier);
        let mut conn = self.redis.connection();
        let (count,): (u32,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(&key)
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(millis(window))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn lock(&self, identifier: &str, duration: Duration) -> StoreResult<bool> {
        let mut conn = self.redis.connection();
        let (created,): (Option<String>,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(lockout_key(identifier))
            .arg("1")
            .arg("PX")
            .arg(millis(duration))
            .arg("NX")
            .cmd("DEL")
            .arg(attempts_key(identifier))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(created.is_some())
    }

    async fn reset(&self, identifier: &str) -> StoreResult<()> {
        let mut conn = self.redis.connection();
        redis::cmd("DEL")
            .arg(attempts_key(identifier))
            .arg(lockout_key(identifier))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_ip_flagged(&self, ip: &str) -> StoreResult<bool> {
        let mut conn = self.redis.connection();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(suspicious_ip_key(ip))
            .query_async(&mut conn)
            .await?;
        Ok(exists > 0)
    }

    async fn flag_ip(&self, ip: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.redis.connection();
        redis::cmd("SET")
            .arg(suspicious_ip_key(ip))
            .arg("1")
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn attempt_stats(
        &self,
        identifier: &str,
        _window: Duration,
    ) -> StoreResult<AttemptSnapshot> {
        let attempts = attempts_key(identifier);
        let mut conn = self.redis.connection();
        let (count, window_pttl, lockout_pttl): (Option<u32>, i64, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(&attempts)
            .cmd("PTTL")
            .arg(&attempts)
            .cmd("PTTL")
            .arg(lockout_key(identifier))
            .query_async(&mut conn)
            .await?;

        Ok(AttemptSnapshot {
            attempts: count.unwrap_or(0),
            window_remaining: pttl_to_remaining(window_pttl),
            lockout_remaining: pttl_to_remaining(lockout_pttl),
        })
    }
}
