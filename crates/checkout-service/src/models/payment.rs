use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CheckoutError, Result};

/// 支付状态通知
///
/// 网关 webhook 形如 `{"type":"payment","data":{"id":"123"}}`，
/// 部分版本使用 `topic` 代替 `type`；broker 上的支付事件也可能是扁平的 `{"id":123}`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub kind: Option<String>,
    pub payment_id: Option<String>,
}

impl PaymentNotification {
    /// 解析通知体，非法 JSON 或非对象视为格式错误
    pub fn parse(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| CheckoutError::MalformedMessage(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CheckoutError::MalformedMessage("通知体不是 JSON 对象".into()))?;

        let kind = obj
            .get("type")
            .or_else(|| obj.get("topic"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let payment_id = match obj.get("data") {
            Some(Value::Object(data)) => data.get("id").and_then(scalar_id),
            Some(Value::Null) | None => obj.get("id").and_then(scalar_id),
            Some(other) => scalar_id(other),
        };

        Ok(Self { kind, payment_id })
    }

    /// 未声明类型的扁平事件按支付事件处理，其余只接受 payment
    pub fn is_payment(&self) -> bool {
        match self.kind.as_deref() {
            None => true,
            Some(kind) => kind == "payment",
        }
    }

    pub fn require_payment_id(&self) -> Result<&str> {
        self.payment_id
            .as_deref()
            .ok_or(CheckoutError::MissingPaymentId)
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => (f as i64).to_string(),
                _ => n.to_string(),
            },
        },
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// 网关返回的支付详情
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusDetails {
    pub status: String,
    #[serde(default)]
    pub external_reference: Option<String>,
}

impl PaymentStatusDetails {
    /// external_reference 即订单 ID，必须是数字
    pub fn order_id(&self) -> Result<i64> {
        let reference = self.external_reference.as_deref().unwrap_or("").trim();
        reference
            .parse::<i64>()
            .map_err(|_| CheckoutError::InvalidExternalReference(reference.to_string()))
    }

    pub fn action(&self) -> PaymentAction {
        PaymentAction::from_status(&self.status)
    }
}

/// 网关支付状态对应的对账动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
    Approve,
    Reject,
    Ignore,
}

impl PaymentAction {
    pub fn from_status(status: &str) -> Self {
        match status {
            "approved" => Self::Approve,
            "rejected" | "cancelled" => Self::Reject,
            _ => Self::Ignore,
        }
    }
}
