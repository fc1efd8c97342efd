//! 购物车仓储
//!
//! 购物车以 JSON 存在 Redis 的 `cart:{user_id}` 下，每次写入刷新 TTL

use std::time::Duration;

use async_trait::async_trait;
use cart_shared::cache::{Cache, CacheKey};
use tracing::{debug, instrument};

use super::traits::CartRepositoryTrait;
use crate::error::Result;
use crate::models::Cart;

pub struct RedisCartRepository {
    cache: Cache,
    ttl: Duration,
}

impl RedisCartRepository {
    pub fn new(cache: Cache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl CartRepositoryTrait for RedisCartRepository {
    #[instrument(skip(self))]
    async fn get(&self, user_id: &str) -> Result<Cart> {
        let cart: Option<Cart> = self.cache.get(&CacheKey::cart(user_id)).await?;
        Ok(cart.unwrap_or_else(|| Cart::empty(user_id)))
    }

    #[instrument(skip(self, cart), fields(user_id = %cart.user_id, lines = cart.items.len()))]
    async fn save(&self, cart: &Cart) -> Result<()> {
        self.cache
            .set(&CacheKey::cart(&cart.user_id), cart, self.ttl)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, user_id: &str) -> Result<()> {
        self.cache.delete(&CacheKey::cart(user_id)).await?;
        debug!(user_id, "购物车已删除");
        Ok(())
    }

    async fn ttl(&self, user_id: &str) -> Result<Option<Duration>> {
        Ok(self.cache.ttl(&CacheKey::cart(user_id)).await?)
    }

    async fn extend_ttl(&self, user_id: &str, ttl: Duration) -> Result<()> {
        self.cache.expire(&CacheKey::cart(user_id), ttl).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cart_shared::config::RedisConfig;

    fn repo() -> RedisCartRepository {
        let cache = Cache::new(&RedisConfig::default()).unwrap();
        RedisCartRepository::new(cache, Duration::from_secs(60))
    }

    #[tokio::test]
    #[ignore = "需要 Redis"]
    async fn test_save_get_delete() {
        let repo = repo();
        let mut cart = Cart::empty("itest-cart-user");
        cart.set_quantity("p1", 2);

        repo.save(&cart).await.unwrap();
        let loaded = repo.get("itest-cart-user").await.unwrap();
        assert_eq!(loaded.quantity_of("p1"), 2);
        assert!(repo.ttl("itest-cart-user").await.unwrap().is_some());

        repo.delete("itest-cart-user").await.unwrap();
        assert!(repo.get("itest-cart-user").await.unwrap().is_empty());
        assert!(repo.ttl("itest-cart-user").await.unwrap().is_none());
    }
}
