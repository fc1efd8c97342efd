//! 死信与重投
//!
//! 需要重投的入站消息按退避策略等待后，带着递增的 x-redelivery-count
//! 重新发回来源 topic；超过上限后改写入死信队列。

use async_trait::async_trait;
use cart_shared::dlq::{DeadLetter, DlqProducer};
use cart_shared::retry::RetryPolicy;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::rpc::{InboundDelivery, OutboundMessage, RpcTransport};

/// 死信写入端
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(
        &self,
        message_id: &str,
        source: &str,
        payload: &[u8],
        error: &str,
        attempts: u32,
    ) -> Result<()>;
}

#[async_trait]
impl DeadLetterSink for DlqProducer {
    async fn dead_letter(
        &self,
        message_id: &str,
        source: &str,
        payload: &[u8],
        error: &str,
        attempts: u32,
    ) -> Result<()> {
        self.publish(DeadLetter::new(message_id, source, payload, error, attempts))
            .await?;
        Ok(())
    }
}

/// 重投一条入站消息，超过上限则写入死信
///
/// `policy.max_retries` 为重投上限；第 n 次重投前等待 `policy.backoff(n - 1)`。
/// 返回 true 表示消息已重新发布，false 表示已转入死信（或写入失败）。
pub async fn redeliver(
    transport: &dyn RpcTransport,
    sink: &dyn DeadLetterSink,
    delivery: &InboundDelivery,
    policy: &RetryPolicy,
    reason: &str,
) -> bool {
    let attempts = delivery.redelivery_count + 1;
    let message_id = delivery
        .correlation_id
        .clone()
        .or_else(|| delivery.key.clone())
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    if attempts > policy.max_retries {
        warn!(
            message_id = %message_id,
            source = %delivery.source,
            attempts,
            reason,
            "超过最大重投次数，写入死信队列"
        );
        if let Err(e) = sink
            .dead_letter(&message_id, &delivery.source, &delivery.payload, reason, attempts)
            .await
        {
            error!(message_id = %message_id, error = %e, "写入死信队列失败，消息丢失");
        }
        return false;
    }

    let delay = policy.backoff(delivery.redelivery_count);
    debug!(
        message_id = %message_id,
        attempts,
        delay_ms = delay.as_millis() as u64,
        "等待后重新投递"
    );
    tokio::time::sleep(delay).await;

    let message = OutboundMessage {
        target: delivery.source.clone(),
        key: delivery.key.clone(),
        payload: delivery.payload.clone(),
        reply_to: delivery.reply_to.clone(),
        correlation_id: delivery.correlation_id.clone(),
        redelivery_count: Some(attempts),
    };

    match transport.publish(message).await {
        Ok(()) => {
            warn!(message_id = %message_id, source = %delivery.source, attempts, reason, "消息已重新投递");
            true
        }
        Err(e) => {
            error!(message_id = %message_id, error = %e, "重新投递失败，写入死信队列");
            if let Err(e) = sink
                .dead_letter(&message_id, &delivery.source, &delivery.payload, reason, attempts)
                .await
            {
                error!(message_id = %message_id, error = %e, "写入死信队列失败，消息丢失");
            }
            false
        }
    }
}
