//! RPC 信封编解码
//!
//! 请求信封 `{pattern, data}`，响应信封 `{response, status}`。
//! 两端共用同一套编码，调用方与监听方不各自拼 JSON。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CheckoutError, Result};

/// 请求信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub pattern: String,
    #[serde(default)]
    pub data: Value,
}

impl RequestEnvelope {
    pub fn new<T: Serialize + ?Sized>(pattern: &str, data: &T) -> Result<Self> {
        Ok(Self {
            pattern: pattern.to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 非法 JSON 或缺少 pattern 视为格式错误
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| CheckoutError::MalformedMessage(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// 响应信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub response: Value,
    pub status: ResponseStatus,
}

impl ResponseEnvelope {
    pub fn success(response: Value) -> Self {
        Self {
            response,
            status: ResponseStatus::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            response: serde_json::json!({ "message": message.into() }),
            status: ResponseStatus::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    /// 错误信封中的消息文本
    pub fn error_message(&self) -> String {
        match &self.response {
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
            Value::String(s) => s.clone(),
            Value::Null => "远端返回错误".to_string(),
            other => other.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// 解码 RPC 回复并取出 response 载荷
///
/// 空回复、`null` 和 `{}` 都算"无回复体"，与远端报错、载荷结构不符区分开。
pub fn decode_reply<T: DeserializeOwned>(pattern: &str, body: &[u8]) -> Result<T> {
    let no_body = || CheckoutError::RpcNoBody {
        pattern: pattern.to_string(),
    };
    let malformed = |message: String| CheckoutError::RpcMalformedReply {
        pattern: pattern.to_string(),
        message,
    };

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(no_body());
    }

    let raw: Value = serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;
    match &raw {
        Value::Null => return Err(no_body()),
        Value::Object(obj) if obj.is_empty() => return Err(no_body()),
        _ => {}
    }

    let response = match classify(raw) {
        ReplyShape::Envelope(envelope) => {
            let envelope: ResponseEnvelope =
                serde_json::from_value(envelope).map_err(|e| malformed(e.to_string()))?;
            if envelope.is_error() {
                return Err(CheckoutError::RpcRemote {
                    pattern: pattern.to_string(),
                    message: envelope.error_message(),
                });
            }
            envelope.response
        }
        ReplyShape::Remote(message) => {
            return Err(CheckoutError::RpcRemote {
                pattern: pattern.to_string(),
                message,
            });
        }
        ReplyShape::Bare(response) => response,
    };

    if response.is_null() {
        return Err(no_body());
    }

    serde_json::from_value(response).map_err(|e| malformed(e.to_string()))
}

enum ReplyShape {
    /// `{response, status}`
    Envelope(Value),
    /// `{response, err}` 且 err 非空
    Remote(String),
    /// 载荷本身
    Bare(Value),
}

/// 兼容三种回复形态：本服务的 `{response, status}`、
/// 只有 `{response, err}` 的 Nest 风格回复，以及直接返回载荷
fn classify(raw: Value) -> ReplyShape {
    let Value::Object(mut obj) = raw else {
        return ReplyShape::Bare(raw);
    };

    if obj.contains_key("status") && obj.contains_key("response") {
        return ReplyShape::Envelope(Value::Object(obj));
    }

    if let Some(response) = obj.remove("response") {
        return match obj.remove("err") {
            Some(Value::Null) | None => ReplyShape::Bare(response),
            Some(err) => ReplyShape::Remote(
                ResponseEnvelope {
                    response: err,
                    status: ResponseStatus::Error,
                }
                .error_message(),
            ),
        };
    }

    ReplyShape::Bare(Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StockValidation;

    #[test]
    fn test_request_roundtrip_shape() {
        let req = RequestEnvelope::new("get_cart_by_user", &serde_json::json!({"user_id": 1}))
            .unwrap();
        let json: Value = serde_json::from_slice(&req.encode().unwrap()).unwrap();
        assert_eq!(json["pattern"], "get_cart_by_user");
        assert_eq!(json["data"]["user_id"], 1);
    }

    #[test]
    fn test_request_decode_rejects_garbage() {
        assert!(matches!(
            RequestEnvelope::decode(b"{not json"),
            Err(CheckoutError::MalformedMessage(_))
        ));
        assert!(matches!(
            RequestEnvelope::decode(br#"{"data":{}}"#),
            Err(CheckoutError::MalformedMessage(_))
        ));
        // data 缺省为 null
        let req = RequestEnvelope::decode(br#"{"pattern":"get_all_orders"}"#).unwrap();
        assert!(req.data.is_null());
    }

    #[test]
    fn test_error_envelope_shape() {
        let env = ResponseEnvelope::error("购物车为空");
        let json: Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["response"]["message"], "购物车为空");
    }

    #[test]
    fn test_decode_reply_success() {
        let body = br#"{"response":{"valid":true,"message":""},"status":"success"}"#;
        let v: StockValidation = decode_reply("validate_stock", body).unwrap();
        assert!(v.valid);
    }

    #[test]
    fn test_decode_reply_no_body() {
        for body in [&b""[..], &b"  "[..], &b"null"[..], &b"{}"[..]] {
            let err = decode_reply::<StockValidation>("validate_stock", body).unwrap_err();
            assert!(matches!(err, CheckoutError::RpcNoBody { .. }), "{body:?}");
        }

        let err = decode_reply::<StockValidation>(
            "validate_stock",
            br#"{"response":null,"status":"success"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CheckoutError::RpcNoBody { .. }));
    }

    #[test]
    fn test_decode_reply_remote_error() {
        let body = br#"{"response":{"message":"producto no existe"},"status":"error"}"#;
        let err = decode_reply::<StockValidation>("validate_stock", body).unwrap_err();
        assert_eq!(err.to_string(), "producto no existe");
    }

    #[test]
    fn test_decode_reply_bare_and_nest_shapes() {
        let v: StockValidation =
            decode_reply("validate_stock", br#"{"valid":false,"message":"sin stock"}"#).unwrap();
        assert!(!v.valid);
        assert_eq!(v.message, "sin stock");

        let v: StockValidation = decode_reply(
            "validate_stock",
            br#"{"err":null,"response":{"valid":true},"isDisposed":true}"#,
        )
        .unwrap();
        assert!(v.valid);

        let err = decode_reply::<StockValidation>(
            "validate_stock",
            br#"{"err":{"message":"boom"},"response":null}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_decode_reply_malformed() {
        let body = br#"{"response":{"unexpected":1},"status":"success"}"#;
        let err = decode_reply::<StockValidation>("validate_stock", body).unwrap_err();
        assert!(matches!(err, CheckoutError::RpcMalformedReply { .. }));
    }
}
