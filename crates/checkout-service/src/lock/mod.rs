//! 分布式锁
//!
//! - Redis 实现：SET NX PX 获取，Lua 脚本校验 owner 后释放
//! - 进程内实现：按 key 的异步互斥量
//!
//! ```ignore
//! let guard = lock.acquire(&CacheKey::cart_lock(user_id)).await?;
//! let result = mutate_cart().await;
//! guard.release().await?;
//! ```

mod keyed_lock;

pub use keyed_lock::{LocalLock, LockConfig, LockGuard, RedisLock, ResourceLock};
