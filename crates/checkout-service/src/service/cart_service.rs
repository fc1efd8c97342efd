//! 购物车服务
//!
//! 数量调整规则：
//! - 目标数量 = 当前数量 + 增量，行不存在时当前数量为 0
//! - 行不存在且增量 <= 0：报错，不写存储
//! - 目标数量 > 0：恰好一次库存校验，校验失败原样返回商品服务的消息
//! - 目标数量 <= 0：删除该行，不做库存校验
//! - 结果为空购物车时删除存储，否则整车写回

use std::sync::Arc;

use async_trait::async_trait;
use cart_shared::cache::CacheKey;
use tracing::{debug, info, instrument, warn};

use super::capabilities::CartCapability;
use crate::error::{CheckoutError, Result};
use crate::lock::{LockGuard, ResourceLock};
use crate::models::{Cart, CartCalculation, ProductInput};
use crate::product_client::ProductCatalog;
use crate::repository::CartRepositoryTrait;

pub struct CartService {
    carts: Arc<dyn CartRepositoryTrait>,
    products: Arc<dyn ProductCatalog>,
    lock: Arc<dyn ResourceLock>,
}

impl CartService {
    pub fn new(
        carts: Arc<dyn CartRepositoryTrait>,
        products: Arc<dyn ProductCatalog>,
        lock: Arc<dyn ResourceLock>,
    ) -> Self {
        Self {
            carts,
            products,
            lock,
        }
    }

    async fn release(&self, guard: LockGuard) {
        let key = guard.key().to_string();
        if let Err(e) = guard.release().await {
            warn!(lock_key = %key, error = %e, "释放购物车锁失败");
        }
    }

    /// 空购物车删除，否则写回
    async fn persist(&self, cart: Cart) -> Result<Cart> {
        if cart.is_empty() {
            self.carts.delete(&cart.user_id).await?;
        } else {
            self.carts.save(&cart).await?;
        }
        Ok(cart)
    }

    async fn adjust_locked(&self, user_id: &str, product_id: &str, delta: i32) -> Result<Cart> {
        let mut cart = self.carts.get(user_id).await?;
        let exists = cart.contains(product_id);

        if !exists && delta <= 0 {
            return Err(CheckoutError::ItemNotInCart {
                product_id: product_id.to_string(),
            });
        }

        let current = cart.quantity_of(product_id);
        let target = current.saturating_add(delta);
        debug!(user_id, product_id, current, delta, target, "计算目标数量");

        if target > 0 {
            let validation = self
                .products
                .validate_stock(&[ProductInput {
                    product_id: product_id.to_string(),
                    quantity: target,
                }])
                .await?;

            if !validation.valid {
                info!(user_id, product_id, target, message = %validation.message, "库存校验未通过");
                return Err(CheckoutError::StockRejected(validation.message));
            }
        }

        cart.set_quantity(product_id, target);
        self.persist(cart).await
    }

    async fn remove_locked(&self, user_id: &str, product_id: &str) -> Result<Cart> {
        let mut cart = self.carts.get(user_id).await?;
        if !cart.remove_item(product_id) {
            debug!(user_id, product_id, "待删除的商品不在购物车中");
        }
        self.persist(cart).await
    }
}

fn require_product_id(product_id: &str) -> Result<&str> {
    let trimmed = product_id.trim();
    if trimmed.is_empty() {
        return Err(CheckoutError::Validation("product_id 不能为空".into()));
    }
    Ok(trimmed)
}

#[async_trait]
impl CartCapability for CartService {
    #[instrument(skip(self))]
    async fn adjust_item_quantity(
        &self,
        user_id: &str,
        product_id: &str,
        delta: i32,
    ) -> Result<Cart> {
        let product_id = require_product_id(product_id)?;

        let guard = self.lock.acquire(&CacheKey::cart_lock(user_id)).await?;
        let result = self.adjust_locked(user_id, product_id, delta).await;
        self.release(guard).await;

        result
    }

    #[instrument(skip(self))]
    async fn get_cart_with_prices(&self, user_id: &str) -> Result<CartCalculation> {
        let cart = self.carts.get(user_id).await?;
        if cart.is_empty() {
            return Ok(CartCalculation::default());
        }
        self.products.calculate_cart(&cart.product_inputs()).await
    }

    #[instrument(skip(self))]
    async fn remove_item(&self, user_id: &str, product_id: &str) -> Result<Cart> {
        let product_id = require_product_id(product_id)?;

        let guard = self.lock.acquire(&CacheKey::cart_lock(user_id)).await?;
        let result = self.remove_locked(user_id, product_id).await;
        self.release(guard).await;

        result
    }

    #[instrument(skip(self))]
    async fn clear_cart(&self, user_id: &str) -> Result<()> {
        let guard = self.lock.acquire(&CacheKey::cart_lock(user_id)).await?;
        let result = self.carts.delete(user_id).await;
        self.release(guard).await;

        result
    }
}
