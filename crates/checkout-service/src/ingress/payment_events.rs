//! broker 上的支付事件
//!
//! 订阅 `^payment\..*`，每条事件走与 webhook 相同的对账流程。
//! 需要重投的事件带递增计数发回来源 topic，超过上限进入死信队列。

use std::sync::Arc;

use cart_shared::kafka::{KafkaConsumer, topics};
use cart_shared::retry::RetryPolicy;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::reconcile_notification;
use crate::dead_letter::{DeadLetterSink, redeliver};
use crate::error::Result;
use crate::models::PaymentNotification;
use crate::rpc::{Disposition, InboundDelivery, RpcTransport, inbound_from_kafka};
use crate::service::PaymentFinalizer;

/// 处理一条支付事件，格式错误的事件直接丢弃
pub async fn handle_payment_event(finalizer: &dyn PaymentFinalizer, payload: &[u8]) -> Disposition {
    match PaymentNotification::parse(payload) {
        Ok(notification) => reconcile_notification(finalizer, &notification, "broker").await,
        Err(e) => {
            warn!(error = %e, "支付事件无法解析，丢弃");
            Disposition::Discard
        }
    }
}

pub struct PaymentEventConsumer {
    finalizer: Arc<dyn PaymentFinalizer>,
    transport: Arc<dyn RpcTransport>,
    dead_letters: Arc<dyn DeadLetterSink>,
    redelivery: RetryPolicy,
}

impl PaymentEventConsumer {
    pub fn new(
        finalizer: Arc<dyn PaymentFinalizer>,
        transport: Arc<dyn RpcTransport>,
        dead_letters: Arc<dyn DeadLetterSink>,
        redelivery: RetryPolicy,
    ) -> Self {
        Self {
            finalizer,
            transport,
            dead_letters,
            redelivery,
        }
    }

    pub async fn process(&self, delivery: InboundDelivery) -> Disposition {
        let disposition = handle_payment_event(self.finalizer.as_ref(), &delivery.payload).await;
        debug!(
            source = %delivery.source,
            attempt = delivery.redelivery_count,
            disposition = disposition.as_str(),
            "支付事件处理完成"
        );

        if disposition == Disposition::Requeue {
            redeliver(
                self.transport.as_ref(),
                self.dead_letters.as_ref(),
                &delivery,
                &self.redelivery,
                "支付对账失败",
            )
            .await;
        }
        disposition
    }

    pub async fn run(
        self: Arc<Self>,
        consumer: KafkaConsumer,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        consumer.subscribe(&[topics::PAYMENT_EVENTS_PATTERN])?;
        info!(pattern = topics::PAYMENT_EVENTS_PATTERN, "支付事件消费者已启动");

        consumer
            .start(shutdown, |msg| {
                let this = Arc::clone(&self);
                async move {
                    tokio::spawn(async move {
                        this.process(inbound_from_kafka(msg)).await;
                    });
                    Ok(())
                }
            })
            .await;

        info!("支付事件消费者已停止");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::MockDeadLetterSink;
    use crate::error::CheckoutError;
    use crate::rpc::InMemoryTransport;
    use crate::service::{MockPaymentFinalizer, ReconcileOutcome};
    use std::time::Duration;

    fn quick_redelivery() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn delivery(payload: &str, redelivery_count: u32) -> InboundDelivery {
        InboundDelivery {
            payload: payload.as_bytes().to_vec(),
            source: "payment.status".into(),
            key: Some("pay-1".into()),
            redelivery_count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_flat_event_is_reconciled() {
        let mut finalizer = MockPaymentFinalizer::new();
        finalizer
            .expect_finalize()
            .withf(|id| id == "789")
            .times(1)
            .returning(|_| Ok(ReconcileOutcome::Paid));

        assert_eq!(
            handle_payment_event(&finalizer, br#"{"id":789}"#).await,
            Disposition::Ack
        );
    }

    #[tokio::test]
    async fn test_malformed_event_is_discarded() {
        let mut finalizer = MockPaymentFinalizer::new();
        finalizer.expect_finalize().never();

        assert_eq!(
            handle_payment_event(&finalizer, b"[1,2").await,
            Disposition::Discard
        );
    }

    #[tokio::test]
    async fn test_requeue_republishes_to_source() {
        let mut finalizer = MockPaymentFinalizer::new();
        finalizer
            .expect_finalize()
            .returning(|_| Err(CheckoutError::Gateway("HTTP 502".into())));
        let mut dlq = MockDeadLetterSink::new();
        dlq.expect_dead_letter().never();
        let (transport, mut outbox) = InMemoryTransport::new("cart.rpc.replies");

        let consumer = PaymentEventConsumer::new(
            Arc::new(finalizer),
            Arc::new(transport),
            Arc::new(dlq),
            quick_redelivery(),
        );

        let disposition = consumer
            .process(delivery(r#"{"type":"payment","data":{"id":"1"}}"#, 0))
            .await;
        assert_eq!(disposition, Disposition::Requeue);

        let republished = outbox.recv().await.unwrap();
        assert_eq!(republished.target, "payment.status");
        assert_eq!(republished.redelivery_count, Some(1));
    }

    #[tokio::test]
    async fn test_exhausted_redeliveries_go_to_dead_letter() {
        let mut finalizer = MockPaymentFinalizer::new();
        finalizer
            .expect_finalize()
            .returning(|_| Err(CheckoutError::Gateway("HTTP 502".into())));
        let mut dlq = MockDeadLetterSink::new();
        dlq.expect_dead_letter()
            .withf(|_, source, _, _, attempts| source == "payment.status" && *attempts == 4)
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        let (transport, mut outbox) = InMemoryTransport::new("cart.rpc.replies");

        let consumer = PaymentEventConsumer::new(
            Arc::new(finalizer),
            Arc::new(transport),
            Arc::new(dlq),
            quick_redelivery(),
        );

        consumer
            .process(delivery(r#"{"type":"payment","data":{"id":"1"}}"#, 3))
            .await;
        assert!(outbox.try_recv().is_err());
    }
}
