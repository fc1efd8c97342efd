//! 结算服务专用错误类型
//!
//! 在共享库 CartError 基础上定义购物车、结算、RPC 与支付对账的错误变体。
//! 每个变体归入一个 `ErrorKind`，决定它返回给调用方、触发重投还是直接丢弃。

use cart_shared::error::CartError;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 调用方输入或业务规则不满足，重试不会成功
    Validation,
    /// broker、超时、网关或存储不可用，入站消息应重投
    Transport,
    /// 消息本身无法处理（格式错误、引用无效），确认后丢弃
    Discardable,
    /// 对账中途失败（已标记支付但扣减库存失败），需要幂等重试
    PartialFailure,
}

/// 结算服务错误
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("购物车为空")]
    EmptyCart,

    #[error("购物车中不存在该商品: {product_id}")]
    ItemNotInCart { product_id: String },

    /// 商品服务拒绝库存校验，消息原样透传给调用方
    #[error("{0}")]
    StockRejected(String),

    #[error("未知的 RPC 模式: {0}")]
    UnknownPattern(String),

    #[error("订单不存在: {0}")]
    OrderNotFound(i64),

    #[error("无效的外部引用: {0}")]
    InvalidExternalReference(String),

    #[error("缺少支付 ID")]
    MissingPaymentId,

    #[error("消息格式错误: {0}")]
    MalformedMessage(String),

    #[error("支付不存在: {0}")]
    PaymentNotFound(String),

    #[error("RPC 调用超时: {pattern}")]
    RpcTimeout { pattern: String },

    #[error("RPC 回复为空: {pattern}")]
    RpcNoBody { pattern: String },

    /// 远端以 status=error 回复，消息原样透传
    #[error("{message}")]
    RpcRemote { pattern: String, message: String },

    #[error("RPC 回复无法解析: {pattern} - {message}")]
    RpcMalformedReply { pattern: String, message: String },

    #[error("RPC 传输失败: {0}")]
    RpcTransport(String),

    #[error("商品定价失败: {0}")]
    Pricing(String),

    #[error("支付网关错误: {0}")]
    Gateway(String),

    #[error("扣减库存失败: order_id={order_id} - {message}")]
    StockDecrementFailed { order_id: i64, message: String },

    #[error(transparent)]
    Shared(#[from] CartError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, CheckoutError>;

impl From<sqlx::Error> for CheckoutError {
    fn from(err: sqlx::Error) -> Self {
        Self::Shared(CartError::Database(err))
    }
}

impl From<redis::RedisError> for CheckoutError {
    fn from(err: redis::RedisError) -> Self {
        Self::Shared(CartError::Redis(err))
    }
}

impl From<serde_json::Error> for CheckoutError {
    fn from(err: serde_json::Error) -> Self {
        Self::Shared(CartError::Serialization(err))
    }
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::EmptyCart
            | Self::ItemNotInCart { .. }
            | Self::StockRejected(_)
            | Self::UnknownPattern(_)
            | Self::RpcRemote { .. }
            | Self::Pricing(_) => ErrorKind::Validation,

            Self::OrderNotFound(_)
            | Self::InvalidExternalReference(_)
            | Self::MissingPaymentId
            | Self::MalformedMessage(_)
            | Self::PaymentNotFound(_) => ErrorKind::Discardable,

            Self::StockDecrementFailed { .. } => ErrorKind::PartialFailure,

            Self::RpcTimeout { .. }
            | Self::RpcNoBody { .. }
            | Self::RpcMalformedReply { .. }
            | Self::RpcTransport(_)
            | Self::Gateway(_) => ErrorKind::Transport,

            Self::Shared(CartError::Serialization(_)) => ErrorKind::Discardable,
            Self::Shared(_) => ErrorKind::Transport,
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::EmptyCart => "EMPTY_CART",
            Self::ItemNotInCart { .. } => "ITEM_NOT_IN_CART",
            Self::StockRejected(_) => "STOCK_REJECTED",
            Self::UnknownPattern(_) => "UNKNOWN_PATTERN",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::InvalidExternalReference(_) => "INVALID_EXTERNAL_REFERENCE",
            Self::MissingPaymentId => "MISSING_PAYMENT_ID",
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::RpcTimeout { .. } => "RPC_TIMEOUT",
            Self::RpcNoBody { .. } => "RPC_NO_BODY",
            Self::RpcRemote { .. } => "RPC_REMOTE_ERROR",
            Self::RpcMalformedReply { .. } => "RPC_MALFORMED_REPLY",
            Self::RpcTransport(_) => "RPC_TRANSPORT_ERROR",
            Self::Pricing(_) => "PRICING_FAILED",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::StockDecrementFailed { .. } => "STOCK_DECREMENT_FAILED",
            Self::Shared(inner) => inner.code(),
        }
    }

    /// 是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::PartialFailure
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CheckoutError::ItemNotInCart {
            product_id: "p1".to_string(),
        };
        assert_eq!(err.to_string(), "购物车中不存在该商品: p1");

        // 远端与库存拒绝的消息原样透传
        let err = CheckoutError::StockRejected("Stock insuficiente para p1".to_string());
        assert_eq!(err.to_string(), "Stock insuficiente para p1");

        let err = CheckoutError::RpcRemote {
            pattern: "calculate_cart".to_string(),
            message: "producto no encontrado".to_string(),
        };
        assert_eq!(err.to_string(), "producto no encontrado");

        let err = CheckoutError::Shared(CartError::Kafka("broker 不可达".to_string()));
        assert_eq!(err.to_string(), "Kafka 错误: broker 不可达");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(CheckoutError::EmptyCart.kind(), ErrorKind::Validation);
        assert_eq!(
            CheckoutError::UnknownPattern("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CheckoutError::InvalidExternalReference("abc".into()).kind(),
            ErrorKind::Discardable
        );
        assert_eq!(CheckoutError::MissingPaymentId.kind(), ErrorKind::Discardable);
        assert_eq!(
            CheckoutError::RpcTimeout {
                pattern: "validate_stock".into()
            }
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            CheckoutError::StockDecrementFailed {
                order_id: 77,
                message: "timeout".into()
            }
            .kind(),
            ErrorKind::PartialFailure
        );
        assert_eq!(
            CheckoutError::from(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(CheckoutError::Gateway("503".into()).is_retryable());
        assert!(
            CheckoutError::StockDecrementFailed {
                order_id: 1,
                message: "x".into()
            }
            .is_retryable()
        );
        assert!(!CheckoutError::EmptyCart.is_retryable());
        assert!(!CheckoutError::MalformedMessage("x".into()).is_retryable());
    }
}
