//! 结算流程
//!
//! 读取购物车 -> 延长购物车 TTL -> 商品服务定价 -> 写入 PENDING 订单 -> 创建支付链接
//! -> 异步发布 ORDER_CREATED。
//!
//! 购物车在结算后保留，只有支付确认后的对账才删除它。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cart_shared::observability::metrics;
use tracing::{error, info, instrument};

use super::capabilities::OrderCheckout;
use crate::error::{CheckoutError, Result};
use crate::events::{OrderEvent, SupervisedPublisher};
use crate::models::{CheckoutResult, NewOrder, OrderItem, OrderStatus};
use crate::payment::PaymentGateway;
use crate::product_client::ProductCatalog;
use crate::repository::{CartRepositoryTrait, OrderRepositoryTrait};

pub struct CheckoutService {
    carts: Arc<dyn CartRepositoryTrait>,
    orders: Arc<dyn OrderRepositoryTrait>,
    products: Arc<dyn ProductCatalog>,
    payments: Arc<dyn PaymentGateway>,
    events: SupervisedPublisher,
    checkout_ttl: Duration,
}

impl CheckoutService {
    pub fn new(
        carts: Arc<dyn CartRepositoryTrait>,
        orders: Arc<dyn OrderRepositoryTrait>,
        products: Arc<dyn ProductCatalog>,
        payments: Arc<dyn PaymentGateway>,
        events: SupervisedPublisher,
        checkout_ttl: Duration,
    ) -> Self {
        Self {
            carts,
            orders,
            products,
            payments,
            events,
            checkout_ttl,
        }
    }

    /// 剩余 TTL 不足结算窗口时抬高到结算窗口，已经更长的不缩短
    async fn hold_cart(&self, user_id: &str) -> Result<()> {
        let remaining = self.carts.ttl(user_id).await?;
        if remaining.is_none_or(|ttl| ttl < self.checkout_ttl) {
            self.carts.extend_ttl(user_id, self.checkout_ttl).await?;
        }
        Ok(())
    }

    async fn run(&self, user_id: &str, shipping_address: &str) -> Result<CheckoutResult> {
        let cart = self.carts.get(user_id).await?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let shipping_address = shipping_address.trim();
        if shipping_address.is_empty() {
            return Err(CheckoutError::Validation("收货地址不能为空".into()));
        }

        self.hold_cart(user_id).await?;

        let snapshot = self.products.calculate_cart(&cart.product_inputs()).await?;
        if snapshot.is_empty() {
            return Err(CheckoutError::Pricing("商品服务返回的定价快照为空".into()));
        }

        let items: Vec<OrderItem> = snapshot
            .items
            .into_iter()
            .map(|line| OrderItem {
                product_id: line.product_id,
                name_snapshot: line.name_snapshot,
                unit_price: line.unit_price,
                quantity: line.quantity,
            })
            .collect();

        let order = self
            .orders
            .create(&NewOrder {
                user_id: user_id.to_string(),
                total: snapshot.total_price,
                shipping_address: shipping_address.to_string(),
                items,
            })
            .await?;

        let payment_url = match self
            .payments
            .create_payment(order.id, order.total, &order.items)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                // 订单保持 PENDING，没有支付会引用它
                error!(order_id = order.id, error = %e, "创建支付链接失败");
                return Err(e);
            }
        };

        // 发布失败只进死信，不影响本次结算
        drop(self.events.publish_detached(OrderEvent::created(&order)));

        info!(
            order_id = order.id,
            user_id,
            total = order.total,
            lines = order.items.len(),
            "结算完成，等待支付"
        );

        Ok(CheckoutResult {
            order_id: order.id,
            status: OrderStatus::Pending,
            payment_url,
        })
    }
}

#[async_trait]
impl OrderCheckout for CheckoutService {
    #[instrument(skip(self))]
    async fn checkout(&self, user_id: &str, shipping_address: &str) -> Result<CheckoutResult> {
        let result = self.run(user_id, shipping_address).await;
        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        metrics::record_checkout(status);
        result
    }
}
