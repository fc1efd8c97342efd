//! 仓储 Trait 定义
//!
//! 服务层依赖这些接口而非具体存储，测试中以 mock 或内存实现替换

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Cart, NewOrder, Order, OrderStatus};

/// 购物车仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CartRepositoryTrait: Send + Sync {
    /// 读取购物车，不存在时返回空购物车
    async fn get(&self, user_id: &str) -> Result<Cart>;
    async fn save(&self, cart: &Cart) -> Result<()>;
    async fn delete(&self, user_id: &str) -> Result<()>;

    /// 剩余存活时间，购物车不存在时为 None
    async fn ttl(&self, user_id: &str) -> Result<Option<Duration>>;
    async fn extend_ttl(&self, user_id: &str, ttl: Duration) -> Result<()>;
}

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 在同一事务内写入订单与订单行
    async fn create(&self, order: &NewOrder) -> Result<Order>;

    /// 按 ID 查询订单（含订单行）
    async fn find_by_id(&self, id: i64) -> Result<Option<Order>>;
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>>;
    async fn find_all(&self) -> Result<Vec<Order>>;

    /// 订单不存在时返回 OrderNotFound
    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<()>;

    /// 记录库存已扣减，同时写入支付 ID 并置为 PAID
    async fn mark_stock_committed(&self, id: i64, payment_id: &str) -> Result<()>;
}
