//! 基础设施错误
//!
//! 只覆盖存储、缓存、消息中间件这一层；购物车与订单的业务错误在服务内定义，
//! 并通过 `#[from]` 包住这里的类型。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    /// 等锁超时
    #[error("锁冲突: {resource}")]
    LockConflict { resource: String },

    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CartError>;

impl CartError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// 连接类故障可以重试，坏数据与迁移失败不行
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::Kafka(_) | Self::LockConflict { .. }
        )
    }
}
