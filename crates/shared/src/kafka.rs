//! Kafka 客户端
//!
//! RPC 请求、RPC 回复、订单事件与支付事件都走这里的生产者和消费者。
//! reply-to、correlation-id 与重投计数放在消息头里，负载保持为纯 JSON。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::CartError;

/// 默认 topic，均可在配置中覆盖
pub mod topics {
    pub const RPC_REQUESTS: &str = "cart.rpc.requests";
    pub const PRODUCT_RPC_REQUESTS: &str = "products.rpc.requests";
    pub const RPC_REPLIES: &str = "cart.rpc.replies";
    pub const ORDER_EVENTS: &str = "cart.order.events";
    /// 支付事件按前缀匹配订阅（payment.notification、payment.updated 等）
    pub const PAYMENT_EVENTS_PATTERN: &str = "^payment\\..*";
    pub const DEAD_LETTER_QUEUE: &str = "cart.dlq";
}

pub mod headers {
    pub const REPLY_TO: &str = "reply-to";
    pub const CORRELATION_ID: &str = "correlation-id";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const REDELIVERY_COUNT: &str = "x-redelivery-count";
}

/// 脱离 rdkafka 借用生命周期的消息副本，可以移入 spawn 出的任务
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// 只保留 UTF-8 值的消息头
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn detach(msg: &BorrowedMessage<'_>) -> Self {
        let headers = msg
            .headers()
            .map(|h| {
                h.iter()
                    .filter_map(|header| {
                        let value = std::str::from_utf8(header.value?).ok()?;
                        Some((header.key.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg
                .key()
                .and_then(|k| std::str::from_utf8(k).ok())
                .map(String::from),
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
        }
    }

    /// 读取消息头，空字符串视为不存在
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// 克隆开销很小，RPC 传输、事件发布与死信共用同一个实例
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 投递超时 5 秒，超时由调用方决定重试或转死信
    pub fn new(config: &KafkaConfig) -> Result<Self, CartError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| CartError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), CartError> {
        self.send_with_headers(topic, Some(key), payload, &[]).await
    }

    /// 返回写入的 (partition, offset)
    pub async fn send_with_headers(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<(i32, i64), CartError> {
        let mut owned = OwnedHeaders::new_with_capacity(headers.len());
        for (name, value) in headers {
            owned = owned.insert(Header {
                key: name,
                value: Some(*value),
            });
        }

        let mut record = FutureRecord::to(topic).payload(payload).headers(owned);
        if let Some(key) = key {
            record = record.key(key);
        }

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| CartError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), CartError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| CartError::Kafka(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

/// 自动提交 offset 的流式消费者
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// 消费组为 `{consumer_group}.{suffix}`，如 checkout-service.rpc
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, CartError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        Self::with_group(config, &group_id, &config.auto_offset_reset)
    }

    /// RPC 回复消费者用它建实例独占的消费组，从 latest 开始读
    pub fn with_group(
        config: &KafkaConfig,
        group_id: &str,
        auto_offset_reset: &str,
    ) -> Result<Self, CartError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| CartError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer })
    }

    /// 以 `^` 开头的名称按正则订阅
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), CartError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| CartError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 逐条交给 handler，直到关闭信号置为 true
    ///
    /// handler 的错误只记日志，不会中断循环。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), CartError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        debug!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::detach(&borrowed_msg);
                            let (topic, partition, offset) =
                                (msg.topic.clone(), msg.partition, msg.offset);

                            if let Err(e) = handler(msg).await {
                                error!(%topic, partition, offset, error = %e, "处理 Kafka 消息失败");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                    }
                }
            }
        }
    }
}
