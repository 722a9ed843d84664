use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bioqueue_core::{config::DatabaseConfig, SchedulerError, SchedulerResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::sqlite::{SqliteStore, SCHEMA};

/// SQLite 连接池管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(SchedulerError::Database)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await
            .map_err(SchedulerError::Database)?;

        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建表结构（幂等）
    pub async fn migrate(&self) -> SchedulerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn store(&self) -> Arc<SqliteStore> {
        Arc::new(SqliteStore::new(self.pool.clone()))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
