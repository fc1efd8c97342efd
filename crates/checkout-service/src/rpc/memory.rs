//! 进程内传输
//!
//! 发往本端回复地址的消息直接交给回复路由，其余消息进入出站队列，
//! 由测试或本地联调代码取出并扮演远端服务。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{OutboundMessage, ReplyChannel, ReplyRouter, RpcTransport};
use crate::error::{CheckoutError, Result};

pub struct InMemoryTransport {
    reply_address: String,
    router: ReplyRouter,
    outbox: mpsc::UnboundedSender<OutboundMessage>,
}

impl InMemoryTransport {
    pub fn new(reply_address: &str) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let transport = Self {
            reply_address: reply_address.to_string(),
            router: ReplyRouter::new(),
            outbox,
        };
        (transport, rx)
    }

    pub fn router(&self) -> &ReplyRouter {
        &self.router
    }

    pub fn reply_address(&self) -> &str {
        &self.reply_address
    }
}

#[async_trait]
impl RpcTransport for InMemoryTransport {
    fn open_reply_channel(&self, correlation_id: &str) -> Result<ReplyChannel> {
        Ok(ReplyChannel::new(
            self.reply_address.clone(),
            correlation_id,
            &self.router,
        ))
    }

    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if message.target == self.reply_address {
            if let Some(correlation_id) = message.correlation_id.as_deref() {
                self.router.route(correlation_id, message.payload);
            }
            return Ok(());
        }

        self.outbox
            .send(message)
            .map_err(|_| CheckoutError::RpcTransport("出站队列已关闭".into()))
    }
}
