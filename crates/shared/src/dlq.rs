//! 死信队列
//!
//! 重投耗尽或无法重投的消息以 [`DeadLetter`] 信封写入死信 topic，人工排查后重放。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::CartError;
use crate::kafka::{KafkaProducer, topics};

/// 死信信封
///
/// 原始负载能解析为 JSON 时原样嵌入，否则按 UTF-8 有损转换为字符串，
/// 重放时无需二次反转义。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// correlation-id、消息 key 或订单号
    pub message_id: String,
    pub source_topic: String,
    pub payload: Value,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    pub service: String,
}

impl DeadLetter {
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: &[u8],
        reason: impl Into<String>,
        attempts: u32,
    ) -> Self {
        let payload = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));

        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload,
            reason: reason.into(),
            attempts,
            failed_at: Utc::now(),
            service: String::new(),
        }
    }
}

/// 死信写入器，共享服务的 Kafka 生产者
#[derive(Clone)]
pub struct DlqProducer {
    producer: KafkaProducer,
    service: String,
    topic: String,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, service: &str) -> Self {
        Self {
            producer,
            service: service.to_string(),
            topic: topics::DEAD_LETTER_QUEUE.to_string(),
        }
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    /// 以 message_id 作为分区键写入
    pub async fn publish(&self, mut letter: DeadLetter) -> Result<(), CartError> {
        letter.service.clone_from(&self.service);

        self.producer
            .send_json(&self.topic, &letter.message_id, &letter)
            .await?;

        warn!(
            message_id = %letter.message_id,
            source_topic = %letter.source_topic,
            reason = %letter.reason,
            attempts = letter.attempts,
            "消息已写入死信队列"
        );
        Ok(())
    }
}
