//! 订单领域事件
//!
//! 结算成功发布 ORDER_CREATED，对账确认支付后发布 ORDER_PAID。
//! 发布是尽力而为的旁路：有限次退避重试，仍失败写入死信，不影响主流程结果。

use std::sync::Arc;

use async_trait::async_trait;
use cart_shared::kafka::KafkaProducer;
use cart_shared::observability::metrics;
use cart_shared::retry::{RetryPolicy, retry_with_policy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dead_letter::DeadLetterSink;
use crate::error::{CheckoutError, Result};
use crate::models::{Order, OrderItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEvent {
    OrderCreated {
        order_id: i64,
        user_id: String,
        total: i64,
        items: Vec<OrderItem>,
        occurred_at: DateTime<Utc>,
    },
    OrderPaid {
        order_id: i64,
        user_id: String,
        total: i64,
        payment_id: String,
        occurred_at: DateTime<Utc>,
    },
}

impl OrderEvent {
    pub fn created(order: &Order) -> Self {
        Self::OrderCreated {
            order_id: order.id,
            user_id: order.user_id.clone(),
            total: order.total,
            items: order.items.clone(),
            occurred_at: Utc::now(),
        }
    }

    pub fn paid(order: &Order, payment_id: &str) -> Self {
        Self::OrderPaid {
            order_id: order.id,
            user_id: order.user_id.clone(),
            total: order.total,
            payment_id: payment_id.to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub fn order_id(&self) -> i64 {
        match self {
            Self::OrderCreated { order_id, .. } | Self::OrderPaid { order_id, .. } => *order_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "ORDER_CREATED",
            Self::OrderPaid { .. } => "ORDER_PAID",
        }
    }
}

/// 订单事件发布端
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderEventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<()>;
}

/// 以订单 ID 为 key 发布到订单事件 topic，同一订单的事件落在同一分区
pub struct KafkaOrderEventPublisher {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaOrderEventPublisher {
    pub fn new(producer: KafkaProducer, topic: &str) -> Self {
        Self {
            producer,
            topic: topic.to_string(),
        }
    }
}

#[async_trait]
impl OrderEventPublisher for KafkaOrderEventPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<()> {
        self.producer
            .send_json(&self.topic, &event.order_id().to_string(), event)
            .await?;
        debug!(
            order_id = event.order_id(),
            event_type = event.event_type(),
            topic = %self.topic,
            "订单事件已发布"
        );
        Ok(())
    }
}

/// 带重试与死信兜底的发布器
#[derive(Clone)]
pub struct SupervisedPublisher {
    inner: Arc<dyn OrderEventPublisher>,
    dead_letters: Arc<dyn DeadLetterSink>,
    policy: RetryPolicy,
    topic: String,
}

impl SupervisedPublisher {
    pub fn new(
        inner: Arc<dyn OrderEventPublisher>,
        dead_letters: Arc<dyn DeadLetterSink>,
        policy: RetryPolicy,
        topic: &str,
    ) -> Self {
        Self {
            inner,
            dead_letters,
            policy,
            topic: topic.to_string(),
        }
    }

    /// 在独立 task 中发布，返回值表示最终是否发布成功
    pub fn publish_detached(&self, event: OrderEvent) -> JoinHandle<bool> {
        let this = self.clone();
        tokio::spawn(async move { this.publish(event).await })
    }

    /// 发布并吞掉错误，调用方只关心是否成功
    pub async fn publish(&self, event: OrderEvent) -> bool {
        let inner = Arc::clone(&self.inner);
        let result = retry_with_policy(
            &self.policy,
            event.event_type(),
            CheckoutError::is_retryable,
            || {
                let inner = Arc::clone(&inner);
                let event = event.clone();
                async move { inner.publish(&event).await }
            },
        )
        .await;

        match result {
            Ok(()) => {
                metrics::record_order_event(event.event_type(), "success");
                info!(
                    order_id = event.order_id(),
                    event_type = event.event_type(),
                    "订单事件发布成功"
                );
                true
            }
            Err(e) => {
                metrics::record_order_event(event.event_type(), "dead_lettered");
                error!(
                    order_id = event.order_id(),
                    event_type = event.event_type(),
                    error = %e,
                    "订单事件发布失败，写入死信队列"
                );
                self.dead_letter(&event, &e).await;
                false
            }
        }
    }

    async fn dead_letter(&self, event: &OrderEvent, err: &CheckoutError) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(order_id = event.order_id(), error = %e, "订单事件序列化失败");
                return;
            }
        };

        let message_id = format!("{}-{}", event.event_type(), event.order_id());
        if let Err(e) = self
            .dead_letters
            .dead_letter(
                &message_id,
                &self.topic,
                &payload,
                &err.to_string(),
                self.policy.max_retries + 1,
            )
            .await
        {
            error!(message_id = %message_id, error = %e, "写入死信队列失败，事件丢失");
        }
    }
}
