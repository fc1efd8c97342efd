use async_trait::async_trait;

use crate::error::Result;
use crate::models::{OrderItem, PaymentStatusDetails};

/// 支付网关
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// 为订单创建支付，返回用户跳转的支付链接
    ///
    /// 订单 ID 作为网关侧的 external_reference，对账时据此找回订单。
    async fn create_payment(&self, order_id: i64, total: i64, items: &[OrderItem])
    -> Result<String>;

    /// 查询支付状态与 external_reference
    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatusDetails>;
}
