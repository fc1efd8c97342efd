//! RPC 调用方
//!
//! 每次调用：生成 UUIDv7 关联 ID -> 打开回复通道 -> 发布请求 -> 在截止时间内等待唯一回复。
//! 超时只放弃等待，不撤回远端已开始的处理；迟到的回复被路由丢弃。

use std::sync::Arc;
use std::time::{Duration, Instant};

use cart_shared::observability::metrics;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use super::envelope::{RequestEnvelope, decode_reply};
use super::transport::{OutboundMessage, RpcTransport};
use crate::error::{CheckoutError, Result};

#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    target: String,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn RpcTransport>, target: &str, timeout: Duration) -> Self {
        Self {
            transport,
            target: target.to_string(),
            timeout,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// 使用默认超时调用
    pub async fn call<Req, Resp>(&self, pattern: &str, data: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        self.call_with_timeout(pattern, data, self.timeout).await
    }

    pub async fn call_with_timeout<Req, Resp>(
        &self,
        pattern: &str,
        data: &Req,
        timeout: Duration,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let start = Instant::now();
        let result = self.exchange(pattern, data, timeout).await;
        let elapsed = start.elapsed().as_secs_f64();

        let status = match &result {
            Ok(_) => "success",
            Err(CheckoutError::RpcTimeout { .. }) => "timeout",
            Err(_) => "error",
        };
        metrics::record_rpc_call(pattern, status, elapsed);

        result
    }

    async fn exchange<Req, Resp>(&self, pattern: &str, data: &Req, timeout: Duration) -> Result<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let correlation_id = Uuid::now_v7().to_string();
        let payload = RequestEnvelope::new(pattern, data)?.encode()?;

        // 先注册回复通道再发布，避免快速回复先于注册到达
        let channel = self.transport.open_reply_channel(&correlation_id)?;

        self.transport
            .publish(OutboundMessage {
                target: self.target.clone(),
                key: None,
                payload,
                reply_to: Some(channel.reply_to.clone()),
                correlation_id: Some(correlation_id.clone()),
                redelivery_count: None,
            })
            .await?;

        debug!(pattern, correlation_id = %correlation_id, target = %self.target, "RPC 请求已发布");

        let body = match tokio::time::timeout(timeout, channel.recv()).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                return Err(CheckoutError::RpcTransport("回复通道已关闭".into()));
            }
            Err(_) => {
                warn!(
                    pattern,
                    correlation_id = %correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "RPC 调用超时"
                );
                return Err(CheckoutError::RpcTimeout {
                    pattern: pattern.to_string(),
                });
            }
        };

        decode_reply(pattern, &body)
    }
}
