//! 按 key 加锁
//!
//! 同一用户的购物车读-改-写、同一订单的支付确认都必须串行：
//! 前者并发会互相覆盖增减，后者并发会重复扣减库存。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cart_shared::error::CartError;
use dashmap::DashMap;
use redis::Client as RedisClient;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::Result;

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 锁自动过期时间
    pub ttl: Duration,
    /// 获取锁重试次数
    pub retry_count: u32,
    /// 重试间隔
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            retry_count: 50,
            retry_delay: Duration::from_millis(20),
        }
    }
}

impl LockConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }
}

/// 按资源 key 加锁，key 见 `CacheKey::cart_lock` 与 `CacheKey::order_lock`
#[async_trait]
pub trait ResourceLock: Send + Sync {
    /// 获取锁，在重试次数内拿不到则返回 LockConflict
    async fn acquire(&self, key: &str) -> Result<LockGuard>;
}

// ---------------------------------------------------------------------------
// Redis 实现
// ---------------------------------------------------------------------------

/// 基于 Redis 的锁，多实例部署时使用
pub struct RedisLock {
    client: RedisClient,
    config: LockConfig,
    /// 实例唯一标识，区分不同服务实例持有的锁
    instance_id: String,
}

impl RedisLock {
    pub fn new(client: RedisClient, config: LockConfig) -> Self {
        Self {
            client,
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// SET key owner NX PX ttl
    async fn try_lock(&self, key: &str, owner: &str) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(self.config.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }
}

#[async_trait]
impl ResourceLock for RedisLock {
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn acquire(&self, key: &str) -> Result<LockGuard> {
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());

        for attempt in 0..self.config.retry_count.max(1) {
            if self.try_lock(key, &owner).await? {
                debug!(key, attempt, "锁已获取");
                return Ok(LockGuard {
                    key: key.to_string(),
                    owner,
                    backend: LockBackend::Redis(self.client.clone()),
                    released: false,
                });
            }
            tokio::time::sleep(self.config.retry_delay).await;
        }

        Err(CartError::LockConflict {
            resource: key.to_string(),
        }
        .into())
    }
}

// ---------------------------------------------------------------------------
// 进程内实现
// ---------------------------------------------------------------------------

type LocalLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// 进程内锁，单实例部署与测试使用
#[derive(Default)]
pub struct LocalLock {
    locks: LocalLocks,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前持有或等待中的 key 数
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

#[async_trait]
impl ResourceLock for LocalLock {
    async fn acquire(&self, key: &str) -> Result<LockGuard> {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;

        Ok(LockGuard {
            key: key.to_string(),
            owner: String::new(),
            backend: LockBackend::Local(Some(guard), Arc::clone(&self.locks)),
            released: false,
        })
    }
}

// ---------------------------------------------------------------------------
// 锁守卫
// ---------------------------------------------------------------------------

/// 锁守卫
///
/// Redis 锁必须调用 `release()` 显式释放；未释放就 drop 的守卫只记录告警，锁等 TTL 过期。
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    owner: String,
    backend: LockBackend,
    released: bool,
}

#[derive(Debug)]
enum LockBackend {
    Redis(RedisClient),
    Local(Option<OwnedMutexGuard<()>>, LocalLocks),
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match &mut self.backend {
            LockBackend::Redis(client) => {
                let client = client.clone();
                release_redis(&client, &self.key, &self.owner).await
            }
            LockBackend::Local(guard, locks) => {
                guard.take();
                locks.remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
                Ok(())
            }
        }
    }
}

/// Lua 脚本原子校验 owner 后删除，避免误删其他客户端的锁
async fn release_redis(client: &RedisClient, key: &str, owner: &str) -> Result<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;

    let script = r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
    "#;

    let result: i32 = redis::Script::new(script)
        .key(key)
        .arg(owner)
        .invoke_async(&mut conn)
        .await?;

    if result == 0 {
        warn!(key, owner, "锁已过期或被其他客户端持有");
    } else {
        debug!(key, "锁已释放");
    }
    Ok(())
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match &mut self.backend {
            LockBackend::Local(guard, locks) => {
                if guard.take().is_some() {
                    locks.remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
                }
            }
            LockBackend::Redis(_) if !self.released => {
                warn!(
                    lock_key = %self.key,
                    owner = %self.owner,
                    "锁守卫未显式释放，等待 TTL 过期"
                );
            }
            LockBackend::Redis(_) => {}
        }
    }
}
