//! 购物车与结算服务
//!
//! 通过 broker 上的请求/响应协议为 API 网关提供购物车与订单能力，
//! 调用商品服务完成库存校验、定价与扣减，调用支付网关生成支付链接，
//! 并通过 webhook 与支付事件对账订单状态。

pub mod dead_letter;
pub mod error;
pub mod events;
pub mod ingress;
pub mod lock;
pub mod models;
pub mod payment;
pub mod product_client;
pub mod repository;
pub mod rpc;
pub mod service;

pub use error::{CheckoutError, ErrorKind, Result};
