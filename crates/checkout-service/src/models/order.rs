use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 订单状态
///
/// PENDING 在结算时写入，其余状态只由支付对账推进
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 待支付
    #[default]
    Pending,
    /// 已支付
    Paid,
    /// 支付被拒绝或取消
    Rejected,
    /// 已支付但扣减库存失败，等待对账重试
    StockFailed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Rejected => "REJECTED",
            Self::StockFailed => "STOCK_FAILED",
        }
    }

    /// 状态机校验
    ///
    /// STOCK_FAILED -> PAID 只在对账重试时出现；REJECTED 为终态。
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Rejected)
                | (Pending, StockFailed)
                | (Paid, StockFailed)
                | (StockFailed, Paid)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单快照行，结算时冻结名称与单价
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub product_id: String,
    pub name_snapshot: String,
    pub unit_price: i64,
    pub quantity: i32,
}

impl OrderItem {
    pub fn subtotal(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub user_id: String,
    pub total: i64,
    pub status: OrderStatus,
    pub shipping_address: String,
    pub payment_id: Option<String>,
    /// 远端库存已成功扣减，对账重放时据此跳过扣减
    pub stock_committed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

/// 创建订单的输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: String,
    pub total: i64,
    pub shipping_address: String,
    pub items: Vec<OrderItem>,
}

/// process_checkout 的返回
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub order_id: i64,
    pub status: OrderStatus,
    pub payment_url: String,
}
