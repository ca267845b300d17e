//! Redis 连接封装
//! 使用 ConnectionManager（自动重连），可在任务间廉价克隆

use std::time::Duration;

use redis::aio::ConnectionManager;

#[derive(Clone)]
pub struct RedisCtx {
    pub client: redis::Client,
    conn: ConnectionManager,
}

impl RedisCtx {
    /// 建立连接并 PING 一次；超时视为不可达
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| {
                redis::RedisError::from((redis::ErrorKind::IoError, "redis connect timed out"))
            })??;

        let ctx = Self { client, conn };
        let pong = tokio::time::timeout(timeout, ctx.ping())
            .await
            .map_err(|_| {
                redis::RedisError::from((redis::ErrorKind::IoError, "redis ping timed out"))
            })??;
        tracing::debug!(reply = %pong, "Redis reachable");
        Ok(ctx)
    }

    pub async fn ping(&self) -> Result<String, redis::RedisError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }

    /// 连接句柄（ConnectionManager 克隆开销很小）
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}
