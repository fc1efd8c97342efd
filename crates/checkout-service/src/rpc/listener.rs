//! RPC 监听器
//!
//! 每条投递一个 task：解码信封 -> 分发 -> 回复到 reply-to -> 确认。
//! 业务错误也以 status=error 回复并确认；只有处理器 panic 才负确认重投。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use cart_shared::kafka::KafkaConsumer;
use cart_shared::observability::metrics;
use cart_shared::retry::RetryPolicy;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::dispatcher::Dispatcher;
use super::envelope::{RequestEnvelope, ResponseEnvelope};
use super::kafka_transport::inbound_from_kafka;
use super::transport::{Disposition, InboundDelivery, OutboundMessage, RpcTransport};
use crate::dead_letter::{DeadLetterSink, redeliver};
use crate::error::Result;

/// 处理单条入站投递
///
/// 拆为独立函数便于在测试中直接驱动，无需 broker。
pub async fn handle_delivery(
    dispatcher: &Dispatcher,
    transport: &dyn RpcTransport,
    delivery: &InboundDelivery,
) -> Disposition {
    let request = match RequestEnvelope::decode(&delivery.payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(source = %delivery.source, error = %e, "RPC 请求无法解析，丢弃");
            metrics::record_rpc_request("unknown", "discarded", 0.0);
            return Disposition::Discard;
        }
    };

    let start = Instant::now();
    let outcome = AssertUnwindSafe(dispatcher.dispatch(&request.pattern, request.data))
        .catch_unwind()
        .await;
    let elapsed = start.elapsed().as_secs_f64();

    let envelope = match outcome {
        Ok(Ok(response)) => {
            metrics::record_rpc_request(&request.pattern, "success", elapsed);
            ResponseEnvelope::success(response)
        }
        Ok(Err(e)) => {
            warn!(
                pattern = %request.pattern,
                code = e.code(),
                error = %e,
                "RPC 请求处理失败"
            );
            metrics::record_rpc_request(&request.pattern, "error", elapsed);
            ResponseEnvelope::error(e.to_string())
        }
        Err(_) => {
            error!(pattern = %request.pattern, "RPC 处理器 panic，消息将重投");
            metrics::record_rpc_request(&request.pattern, "panic", elapsed);
            return Disposition::Requeue;
        }
    };

    let Some(reply_to) = delivery.reply_to.as_deref() else {
        return Disposition::Ack;
    };

    let payload = match envelope.encode() {
        Ok(payload) => payload,
        Err(e) => {
            error!(pattern = %request.pattern, error = %e, "RPC 回复序列化失败");
            return Disposition::Ack;
        }
    };

    if let Err(e) = transport
        .publish(OutboundMessage {
            target: reply_to.to_string(),
            key: None,
            payload,
            reply_to: None,
            correlation_id: delivery.correlation_id.clone(),
            redelivery_count: None,
        })
        .await
    {
        error!(pattern = %request.pattern, reply_to, error = %e, "发布 RPC 回复失败");
    }

    Disposition::Ack
}

pub struct RpcListener {
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn RpcTransport>,
    dead_letters: Arc<dyn DeadLetterSink>,
    redelivery: RetryPolicy,
}

impl RpcListener {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        transport: Arc<dyn RpcTransport>,
        dead_letters: Arc<dyn DeadLetterSink>,
        redelivery: RetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            transport,
            dead_letters,
            redelivery,
        }
    }

    /// 处理一条投递并执行确认动作
    pub async fn process(&self, delivery: InboundDelivery) -> Disposition {
        let disposition =
            handle_delivery(&self.dispatcher, self.transport.as_ref(), &delivery).await;

        if disposition == Disposition::Requeue {
            redeliver(
                self.transport.as_ref(),
                self.dead_letters.as_ref(),
                &delivery,
                &self.redelivery,
                "RPC 处理器 panic",
            )
            .await;
        }

        disposition
    }

    /// 消费请求 topic，每条消息一个 task，直到收到关闭信号
    pub async fn run(
        self: Arc<Self>,
        consumer: KafkaConsumer,
        topic: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        consumer.subscribe(&[topic])?;
        info!(topic, "RPC 监听器已启动");

        consumer
            .start(shutdown, |msg| {
                let listener = Arc::clone(&self);
                async move {
                    tokio::spawn(async move {
                        listener.process(inbound_from_kafka(msg)).await;
                    });
                    Ok(())
                }
            })
            .await;

        info!("RPC 监听器已停止");
        Ok(())
    }
}
