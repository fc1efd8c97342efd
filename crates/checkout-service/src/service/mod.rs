//! 业务服务层
//!
//! - `CartService`：购物车数量调整、定价视图、删除与清空
//! - `CheckoutService`：结算并生成支付链接
//! - `OrderQueryService`：订单查询
//! - `PaymentReconciler`：支付状态对账

mod capabilities;
mod cart_service;
mod checkout_service;
mod order_query_service;
mod reconciler;

pub use capabilities::{CartCapability, OrderCheckout, OrderQueries};
pub use cart_service::CartService;
pub use checkout_service::CheckoutService;
pub use order_query_service::OrderQueryService;
pub use reconciler::{PaymentFinalizer, PaymentReconciler, ReconcileOutcome};

#[cfg(test)]
pub use capabilities::{MockCartCapability, MockOrderCheckout, MockOrderQueries};
#[cfg(test)]
pub use reconciler::MockPaymentFinalizer;
