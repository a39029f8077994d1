//! PostgreSQL 连接池
//!
//! 账本的余额与流水都在同一个库中，以行锁保证同账户的串行化，
//! 因此连接池大小直接决定可并发处理的账户数。
//! 迁移由服务通过 `sqlx::migrate!` 嵌入，启动时交给 [`Database::run_migrations`]。

use std::time::{Duration, Instant};

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{OtpError, Result};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_seconds)))
}

impl Database {
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = pool_options(config).connect(&config.url).await?;
        info!("PostgreSQL pool ready");
        Ok(Self { pool })
    }

    /// 包装已有连接池（测试中由 `sqlx::test` 或手动连接提供）
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行一次往返查询，返回耗时
    pub async fn health_check(&self) -> Result<Duration> {
        let started = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        let elapsed = started.elapsed();
        debug!(elapsed_ms = elapsed.as_millis() as u64, "PostgreSQL health check");
        Ok(elapsed)
    }

    #[instrument(skip_all)]
    pub async fn run_migrations(&self, migrator: &Migrator) -> Result<()> {
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| OtpError::Database(e.into()))?;
        info!(migrations = migrator.iter().count(), "Migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}
