//! SQLx Postgres 连接池初始化、迁移与健康检查
//!
//! 用法：
//! let pool = init_pool(&config.database).await?;
//! health_check(&pool).await?;

use std::time::Duration;

use crate::config::DatabaseConfig;

pub type PgPool = sqlx::Pool<sqlx::Postgres>;

/// 初始化连接池
///
/// 连接后立即做一次健康检查，失败直接返回错误。
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let max_conns = config.max_connections.clamp(1, 200);
    let min_conns = config.min_connections.min(max_conns);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_conns)
        .min_connections(min_conns)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to Postgres: {}", e);
            e
        })?;

    health_check(&pool).await?;

    if config.run_migrations {
        run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// 执行 migrations/ 下的迁移
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// 健康检查：执行 SELECT 1
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;
    if one != 1 {
        return Err(sqlx::Error::Protocol("unexpected health check result".into()));
    }
    Ok(())
}
