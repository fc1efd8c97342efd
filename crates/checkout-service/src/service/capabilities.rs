//! 分发边界上的能力接口
//!
//! RPC 分发器只依赖这三个 trait，测试中用 mockall 替换。

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Cart, CartCalculation, CheckoutResult, Order};

/// 购物车变更与查询
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CartCapability: Send + Sync {
    /// 按增量调整商品数量
    async fn adjust_item_quantity(&self, user_id: &str, product_id: &str, delta: i32)
    -> Result<Cart>;

    /// 购物车按商品服务定价后的视图
    async fn get_cart_with_prices(&self, user_id: &str) -> Result<CartCalculation>;

    async fn remove_item(&self, user_id: &str, product_id: &str) -> Result<Cart>;

    async fn clear_cart(&self, user_id: &str) -> Result<()>;
}

/// 结算
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderCheckout: Send + Sync {
    async fn checkout(&self, user_id: &str, shipping_address: &str) -> Result<CheckoutResult>;
}

/// 订单查询
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderQueries: Send + Sync {
    async fn user_orders(&self, user_id: &str) -> Result<Vec<Order>>;

    async fn all_orders(&self) -> Result<Vec<Order>>;
}
