//! Redis 访问
//!
//! 购物车以 JSON 字符串存放，键带过期时间；用户锁直接使用底层 [`Client`]。

use crate::config::RedisConfig;
use crate::error::{CartError, Result};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 只解析 URL，不建立连接
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!(url = %config.url, "Redis 客户端已创建");
        Ok(Self { client })
    }

    /// 用户锁需要执行 Lua 脚本
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(CartError::from)
    }

    /// PING
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(CartError::from)
    }

    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;

        value
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(CartError::from)
    }

    /// SETEX，TTL 按秒截断
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)?;

        let _: () = conn.set_ex(key, serialized, ttl.as_secs()).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// 剩余存活时间；键不存在或未设过期时为 None
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.get_conn().await?;
        // -2 不存在，-1 无过期
        let remaining_ms: i64 = conn.pttl(key).await?;
        Ok(u64::try_from(remaining_ms).ok().map(Duration::from_millis))
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}

/// 键命名
pub struct CacheKey;

impl CacheKey {
    pub fn cart(user_id: &str) -> String {
        format!("cart:{}", user_id)
    }

    pub fn cart_lock(user_id: &str) -> String {
        format!("lock:cart:{}", user_id)
    }

    /// 订单支付确认锁
    pub fn order_lock(order_id: i64) -> String {
        format!("lock:order:{}", order_id)
    }
}
