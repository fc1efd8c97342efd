//! PostgreSQL 连接池
//!
//! 订单与订单行存放在这里，表结构由服务目录下的迁移脚本维护。

use crate::config::DatabaseConfig;
use crate::error::{CartError, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "PostgreSQL 连接池已建立"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// SELECT 1
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(CartError::from)
    }

    /// 等待借出的连接归还后关闭
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL 连接池已关闭");
    }

    /// 目录在运行时读取，脚本随部署包分发
    #[instrument(skip(self))]
    pub async fn run_migrations(&self, dir: &Path) -> Result<()> {
        let migrator = Migrator::new(dir).await?;
        migrator.run(&self.pool).await?;
        info!(dir = %dir.display(), "数据库迁移已完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_database_connection() {
        let config = DatabaseConfig::default();
        let db = Database::connect(&config).await.unwrap();
        db.health_check().await.unwrap();
    }
}
