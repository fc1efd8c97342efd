//! 基于消息 broker 的请求/响应
//!
//! - `caller`：调用远端服务（商品服务）
//! - `listener` + `dispatcher`：响应网关发来的购物车与订单请求
//! - `transport`：与 broker 无关的投递、回复路由与确认语义

pub mod caller;
pub mod dispatcher;
pub mod envelope;
pub mod kafka_transport;
pub mod listener;
pub mod memory;
pub mod transport;

pub use caller::RpcClient;
pub use dispatcher::{Dispatcher, Pattern};
pub use envelope::{RequestEnvelope, ResponseEnvelope, ResponseStatus, decode_reply};
pub use kafka_transport::{KafkaRpcTransport, inbound_from_kafka, run_reply_consumer};
pub use listener::{RpcListener, handle_delivery};
pub use memory::InMemoryTransport;
pub use transport::{
    Disposition, InboundDelivery, OutboundMessage, ReplyChannel, ReplyRouter, RpcTransport,
};
