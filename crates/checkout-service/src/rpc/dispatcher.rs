//! 按 pattern 分发入站 RPC 请求
//!
//! user_id 与 product_id 在这里完成"字符串或数字"的规范化，
//! 下游能力接口只接收字符串。

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{CheckoutError, Result};
use crate::models::{UserId, string_or_number};
use crate::service::{CartCapability, OrderCheckout, OrderQueries};

/// 支持的 RPC 模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    AdjustItemQuantity,
    GetCartByUser,
    RemoveItemFromCart,
    ProcessCheckout,
    GetUserOrders,
    GetAllOrders,
}

impl Pattern {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "adjust_item_quantity" => Some(Self::AdjustItemQuantity),
            "get_cart_by_user" => Some(Self::GetCartByUser),
            "remove_item_from_cart" => Some(Self::RemoveItemFromCart),
            "process_checkout" => Some(Self::ProcessCheckout),
            "get_user_orders" => Some(Self::GetUserOrders),
            "get_all_orders" => Some(Self::GetAllOrders),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdjustItemQuantity => "adjust_item_quantity",
            Self::GetCartByUser => "get_cart_by_user",
            Self::RemoveItemFromCart => "remove_item_from_cart",
            Self::ProcessCheckout => "process_checkout",
            Self::GetUserOrders => "get_user_orders",
            Self::GetAllOrders => "get_all_orders",
        }
    }

    /// 除 get_all_orders 外都要求调用方携带 user_id
    pub fn requires_user(&self) -> bool {
        !matches!(self, Self::GetAllOrders)
    }
}

// ---------------------------------------------------------------------------
// 请求载荷
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CallerData {
    #[serde(default)]
    user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct AdjustItemQuantityData {
    #[serde(deserialize_with = "string_or_number")]
    product_id: String,
    quantity: i32,
}

#[derive(Debug, Deserialize)]
struct RemoveItemData {
    #[serde(deserialize_with = "string_or_number")]
    product_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessCheckoutData {
    #[serde(default)]
    shipping_address: String,
}

fn decode_data<T: DeserializeOwned>(pattern: Pattern, data: &Value) -> Result<T> {
    T::deserialize(data).map_err(|e| {
        CheckoutError::Validation(format!("{} 的请求数据无效: {e}", pattern.as_str()))
    })
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    cart: Arc<dyn CartCapability>,
    checkout: Arc<dyn OrderCheckout>,
    orders: Arc<dyn OrderQueries>,
}

impl Dispatcher {
    pub fn new(
        cart: Arc<dyn CartCapability>,
        checkout: Arc<dyn OrderCheckout>,
        orders: Arc<dyn OrderQueries>,
    ) -> Self {
        Self {
            cart,
            checkout,
            orders,
        }
    }

    /// 分发一次请求，返回 response 载荷
    #[instrument(skip(self, data))]
    pub async fn dispatch(&self, pattern: &str, data: Value) -> Result<Value> {
        let pattern =
            Pattern::parse(pattern).ok_or_else(|| CheckoutError::UnknownPattern(pattern.into()))?;

        // data 缺省时按空对象处理
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };

        let caller: CallerData = decode_data(pattern, &data)?;
        let user_id = match (caller.user_id, pattern.requires_user()) {
            (Some(user_id), _) => Some(user_id),
            (None, false) => None,
            (None, true) => {
                return Err(CheckoutError::Validation("缺少 user_id".into()));
            }
        };
        let user = user_id.as_ref().map(UserId::as_str).unwrap_or_default();

        debug!(pattern = pattern.as_str(), user_id = user, "分发 RPC 请求");

        let response = match pattern {
            Pattern::AdjustItemQuantity => {
                let req: AdjustItemQuantityData = decode_data(pattern, &data)?;
                let cart = self
                    .cart
                    .adjust_item_quantity(user, &req.product_id, req.quantity)
                    .await?;
                serde_json::to_value(cart)?
            }
            Pattern::GetCartByUser => {
                serde_json::to_value(self.cart.get_cart_with_prices(user).await?)?
            }
            Pattern::RemoveItemFromCart => {
                let req: RemoveItemData = decode_data(pattern, &data)?;
                serde_json::to_value(self.cart.remove_item(user, &req.product_id).await?)?
            }
            Pattern::ProcessCheckout => {
                let req: ProcessCheckoutData = decode_data(pattern, &data)?;
                serde_json::to_value(self.checkout.checkout(user, &req.shipping_address).await?)?
            }
            Pattern::GetUserOrders => serde_json::to_value(self.orders.user_orders(user).await?)?,
            Pattern::GetAllOrders => serde_json::to_value(self.orders.all_orders().await?)?,
        };

        Ok(response)
    }
}
