//! 领域模型
//!
//! 购物车（Redis）、订单（PostgreSQL）、商品服务 RPC 载荷与支付通知。

mod cart;
mod order;
mod payment;
mod product;

pub use cart::{Cart, CartItem};
pub use order::{CheckoutResult, NewOrder, Order, OrderItem, OrderStatus};
pub use payment::{PaymentAction, PaymentNotification, PaymentStatusDetails};
pub use product::{CartCalculation, PricedItem, ProductInput, StockDecrease, StockValidation};

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// 用户 ID
///
/// 上游网关有时以数字、有时以字符串传递用户 ID，
/// 解码时统一规范为字符串，业务代码只面对一种表示。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// 空白字符串不是合法的用户 ID
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = string_or_number(deserializer)?;
        UserId::parse(raw).ok_or_else(|| serde::de::Error::custom("user_id 不能为空"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
}

/// 接受字符串或数字，统一转为字符串
///
/// 整数值的浮点数（JSON 中的 `42.0`）按整数格式化。
pub fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Str(s) => s,
        StringOrNumber::Int(n) => n.to_string(),
        StringOrNumber::UInt(n) => n.to_string(),
        StringOrNumber::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            (f as i64).to_string()
        }
        StringOrNumber::Float(f) => f.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Amount {
    Int(i64),
    Float(f64),
}

/// 金额以最小货币单位的整数存储，上游 JSON 可能给出浮点数
pub fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Amount::deserialize(deserializer)? {
        Amount::Int(n) => n,
        Amount::Float(f) => f.round() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Data {
        user_id: Option<UserId>,
    }

    #[test]
    fn test_user_id_accepts_string_and_number() {
        let from_str: Data = serde_json::from_str(r#"{"user_id":"42"}"#).unwrap();
        let from_int: Data = serde_json::from_str(r#"{"user_id":42}"#).unwrap();
        let from_float: Data = serde_json::from_str(r#"{"user_id":42.0}"#).unwrap();

        assert_eq!(from_str.user_id.unwrap().as_str(), "42");
        assert_eq!(from_int.user_id.unwrap().as_str(), "42");
        assert_eq!(from_float.user_id.unwrap().as_str(), "42");
    }

    #[test]
    fn test_user_id_missing_or_blank() {
        let missing: Data = serde_json::from_str(r#"{}"#).unwrap();
        assert!(missing.user_id.is_none());

        let null: Data = serde_json::from_str(r#"{"user_id":null}"#).unwrap();
        assert!(null.user_id.is_none());

        assert!(serde_json::from_str::<Data>(r#"{"user_id":"  "}"#).is_err());
        assert!(serde_json::from_str::<Data>(r#"{"user_id":true}"#).is_err());
    }

    #[test]
    fn test_amount_rounds_float() {
        #[derive(Deserialize)]
        struct Price {
            #[serde(deserialize_with = "amount")]
            value: i64,
        }

        let p: Price = serde_json::from_str(r#"{"value":1500}"#).unwrap();
        assert_eq!(p.value, 1500);
        let p: Price = serde_json::from_str(r#"{"value":1499.6}"#).unwrap();
        assert_eq!(p.value, 1500);
    }
}
