//! Kafka 上的 RPC 传输
//!
//! reply-to 与 correlation-id 走消息头。回复 topic 由本实例独占的消费组消费，
//! 消费到的回复按 correlation-id 交给 `ReplyRouter`。

use async_trait::async_trait;
use cart_shared::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, headers};
use tokio::sync::watch;
use tracing::{debug, info};

use super::transport::{InboundDelivery, OutboundMessage, ReplyChannel, ReplyRouter, RpcTransport};
use crate::error::Result;

pub struct KafkaRpcTransport {
    producer: KafkaProducer,
    reply_topic: String,
    router: ReplyRouter,
}

impl KafkaRpcTransport {
    pub fn new(producer: KafkaProducer, reply_topic: &str) -> Self {
        Self {
            producer,
            reply_topic: reply_topic.to_string(),
            router: ReplyRouter::new(),
        }
    }

    pub fn router(&self) -> ReplyRouter {
        self.router.clone()
    }

    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }
}

#[async_trait]
impl RpcTransport for KafkaRpcTransport {
    fn open_reply_channel(&self, correlation_id: &str) -> Result<ReplyChannel> {
        Ok(ReplyChannel::new(
            self.reply_topic.clone(),
            correlation_id,
            &self.router,
        ))
    }

    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let redelivery = message.redelivery_count.map(|n| n.to_string());

        let mut header_list: Vec<(&str, &str)> =
            vec![(headers::CONTENT_TYPE, "application/json")];
        if let Some(reply_to) = message.reply_to.as_deref() {
            header_list.push((headers::REPLY_TO, reply_to));
        }
        if let Some(correlation_id) = message.correlation_id.as_deref() {
            header_list.push((headers::CORRELATION_ID, correlation_id));
        }
        if let Some(count) = redelivery.as_deref() {
            header_list.push((headers::REDELIVERY_COUNT, count));
        }

        self.producer
            .send_with_headers(
                &message.target,
                message.key.as_deref(),
                &message.payload,
                &header_list,
            )
            .await?;
        Ok(())
    }
}

/// 把 Kafka 消息转换为与 broker 无关的入站投递
pub fn inbound_from_kafka(msg: ConsumerMessage) -> InboundDelivery {
    let redelivery_count = msg
        .header(headers::REDELIVERY_COUNT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    InboundDelivery {
        reply_to: msg.header(headers::REPLY_TO).map(str::to_string),
        correlation_id: msg.header(headers::CORRELATION_ID).map(str::to_string),
        source: msg.topic,
        key: msg.key,
        payload: msg.payload,
        redelivery_count,
    }
}

/// 消费回复 topic，直到收到关闭信号
pub async fn run_reply_consumer(
    consumer: KafkaConsumer,
    router: ReplyRouter,
    reply_topic: String,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    consumer.subscribe(&[reply_topic.as_str()])?;
    info!(topic = %reply_topic, "RPC 回复消费者已启动");

    consumer
        .start(shutdown, |msg| {
            let router = &router;
            async move {
                match msg.header(headers::CORRELATION_ID) {
                    Some(correlation_id) => {
                        let correlation_id = correlation_id.to_string();
                        router.route(&correlation_id, msg.payload);
                    }
                    None => debug!(offset = msg.offset, "回复缺少 correlation-id，丢弃"),
                }
                Ok(())
            }
        })
        .await;

    info!("RPC 回复消费者已停止");
    Ok(())
}
