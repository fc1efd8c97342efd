//! 支付对账
//!
//! webhook 与 broker 两个入口共用 `PaymentFinalizer::finalize`。
//! 批准路径：置 PAID -> 重读订单快照 -> 扣减库存 -> 标记 stock_committed
//! -> 删除购物车 -> 发布 ORDER_PAID。
//!
//! 同一订单的确认与拒绝持有 `lock:order:{id}` 串行执行，锁内重读订单；
//! stock_committed 已置位的订单再次收到批准通知时直接返回，不会二次扣减。
//! 扣减成功与标记之间进程崩溃仍会导致重试时重复扣减，这个窗口目前没有关闭。

use std::sync::Arc;

use async_trait::async_trait;
use cart_shared::cache::CacheKey;
use tracing::{info, instrument, warn};

use super::capabilities::CartCapability;
use crate::error::{CheckoutError, Result};
use crate::events::{OrderEvent, SupervisedPublisher};
use crate::lock::ResourceLock;
use crate::models::{Order, OrderStatus, PaymentAction, ProductInput};
use crate::payment::PaymentGateway;
use crate::product_client::ProductCatalog;
use crate::repository::OrderRepositoryTrait;

/// 对账结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 本次完成支付确认与库存扣减
    Paid,
    /// 库存已在之前的对账中扣减
    AlreadySettled,
    /// 订单置为 REJECTED
    Rejected,
    /// 支付状态无需处理，或拒绝通知晚于支付确认
    Ignored,
    /// 已拒绝的订单收到批准通知
    Skipped,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::AlreadySettled => "already_settled",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
            Self::Skipped => "skipped",
        }
    }
}

/// 对账入口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentFinalizer: Send + Sync {
    async fn finalize(&self, payment_id: &str) -> Result<ReconcileOutcome>;
}

pub struct PaymentReconciler {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderRepositoryTrait>,
    carts: Arc<dyn CartCapability>,
    products: Arc<dyn ProductCatalog>,
    lock: Arc<dyn ResourceLock>,
    events: SupervisedPublisher,
}

impl PaymentReconciler {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderRepositoryTrait>,
        carts: Arc<dyn CartCapability>,
        products: Arc<dyn ProductCatalog>,
        lock: Arc<dyn ResourceLock>,
        events: SupervisedPublisher,
    ) -> Self {
        Self {
            gateway,
            orders,
            carts,
            products,
            lock,
            events,
        }
    }

    async fn load_order(&self, order_id: i64) -> Result<Order> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))
    }

    async fn approve(&self, order: Order, payment_id: &str) -> Result<ReconcileOutcome> {
        if order.stock_committed {
            info!(order_id = order.id, payment_id, "库存已扣减，忽略重复的支付确认");
            return Ok(ReconcileOutcome::AlreadySettled);
        }
        if order.status == OrderStatus::Rejected {
            warn!(order_id = order.id, payment_id, "订单已被拒绝，忽略支付确认");
            return Ok(ReconcileOutcome::Skipped);
        }

        if order.status != OrderStatus::Paid {
            self.orders.update_status(order.id, OrderStatus::Paid).await?;
        }

        // 以数据库中的快照为准扣减
        let order = self.load_order(order.id).await?;
        let items: Vec<ProductInput> = order
            .items
            .iter()
            .map(|item| ProductInput {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect();

        let failure = match self.products.decrease_stock(&items).await {
            Ok(result) if result.success => None,
            Ok(result) => Some(result.message),
            Err(e) => Some(e.to_string()),
        };

        if let Some(message) = failure {
            warn!(order_id = order.id, payment_id, message = %message, "扣减库存失败，订单置为 STOCK_FAILED");
            self.orders
                .update_status(order.id, OrderStatus::StockFailed)
                .await?;
            return Err(CheckoutError::StockDecrementFailed {
                order_id: order.id,
                message,
            });
        }

        self.orders.mark_stock_committed(order.id, payment_id).await?;

        // 购物车删除必须持有用户锁
        if let Err(e) = self.carts.clear_cart(&order.user_id).await {
            warn!(order_id = order.id, user_id = %order.user_id, error = %e, "删除购物车失败");
        }

        drop(self.events.publish_detached(OrderEvent::paid(&order, payment_id)));

        info!(order_id = order.id, user_id = %order.user_id, payment_id, "订单支付完成");
        Ok(ReconcileOutcome::Paid)
    }

    async fn reject(&self, order: Order, payment_id: &str) -> Result<ReconcileOutcome> {
        if order.stock_committed || !order.status.can_transition_to(OrderStatus::Rejected) {
            info!(order_id = order.id, payment_id, status = %order.status, "订单不可拒绝，忽略通知");
            return Ok(ReconcileOutcome::Ignored);
        }

        self.orders
            .update_status(order.id, OrderStatus::Rejected)
            .await?;
        info!(order_id = order.id, payment_id, "订单支付被拒绝");
        Ok(ReconcileOutcome::Rejected)
    }

    async fn run(&self, payment_id: &str) -> Result<ReconcileOutcome> {
        let details = self.gateway.payment_status(payment_id).await?;
        let order_id = details.order_id()?;

        let action = details.action();
        if action == PaymentAction::Ignore {
            info!(order_id, payment_id, status = %details.status, "支付状态无需处理");
            return Ok(ReconcileOutcome::Ignored);
        }

        let guard = self.lock.acquire(&CacheKey::order_lock(order_id)).await?;
        let result = self.settle_locked(order_id, action, payment_id).await;
        if let Err(e) = guard.release().await {
            warn!(order_id, error = %e, "释放订单锁失败");
        }
        result
    }

    /// 持有订单锁时执行，订单状态以锁内读取为准
    async fn settle_locked(
        &self,
        order_id: i64,
        action: PaymentAction,
        payment_id: &str,
    ) -> Result<ReconcileOutcome> {
        let order = self.load_order(order_id).await?;
        match action {
            PaymentAction::Approve => self.approve(order, payment_id).await,
            PaymentAction::Reject => self.reject(order, payment_id).await,
            PaymentAction::Ignore => Ok(ReconcileOutcome::Ignored),
        }
    }
}

#[async_trait]
impl PaymentFinalizer for PaymentReconciler {
    #[instrument(skip(self))]
    async fn finalize(&self, payment_id: &str) -> Result<ReconcileOutcome> {
        self.run(payment_id).await
    }
}
