//! RPC 传输抽象
//!
//! 协议层（信封、关联、超时、确认语义）只依赖 `RpcTransport`，
//! Kafka 实现与进程内实现都挂在这个 trait 后面。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CheckoutError, ErrorKind, Result};

// ---------------------------------------------------------------------------
// 入站投递与确认语义
// ---------------------------------------------------------------------------

/// 一条入站消息，与具体 broker 无关
#[derive(Debug, Clone, Default)]
pub struct InboundDelivery {
    pub payload: Vec<u8>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    /// 消息来源的 topic，重投时原样发回
    pub source: String,
    pub key: Option<String>,
    pub redelivery_count: u32,
}

/// 处理结果对应的确认动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 确认
    Ack,
    /// 负确认，重新投递
    Requeue,
    /// 无法处理，确认后丢弃
    Discard,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Requeue => "requeue",
            Self::Discard => "discard",
        }
    }
}

impl From<ErrorKind> for Disposition {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => Disposition::Ack,
            ErrorKind::Discardable => Disposition::Discard,
            ErrorKind::Transport | ErrorKind::PartialFailure => Disposition::Requeue,
        }
    }
}

impl CheckoutError {
    pub fn disposition(&self) -> Disposition {
        self.kind().into()
    }
}

/// 一条出站消息
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub target: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub redelivery_count: Option<u32>,
}

// ---------------------------------------------------------------------------
// 回复路由
// ---------------------------------------------------------------------------

/// 按 correlation-id 把回复交给等待中的调用方
///
/// 每次调用注册一个 oneshot，回复送达或调用方放弃后即注销。
/// 未知 correlation-id 的回复（迟到或重复）直接丢弃。
#[derive(Clone, Default)]
pub struct ReplyRouter {
    pending: Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, correlation_id: &str) -> (oneshot::Receiver<Vec<u8>>, ReplyRegistration) {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.to_string(), tx);
        let registration = ReplyRegistration {
            pending: Arc::clone(&self.pending),
            correlation_id: correlation_id.to_string(),
        };
        (rx, registration)
    }

    /// 投递回复，返回是否有调用方在等待
    pub fn route(&self, correlation_id: &str, body: Vec<u8>) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, tx)) => tx.send(body).is_ok(),
            None => {
                debug!(correlation_id, "无等待方的 RPC 回复，丢弃");
                false
            }
        }
    }

    /// 当前等待回复的调用数
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// 回复注册，析构时注销
pub struct ReplyRegistration {
    pending: Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>,
    correlation_id: String,
}

impl Drop for ReplyRegistration {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

/// 单次调用的回复通道
pub struct ReplyChannel {
    pub reply_to: String,
    pub correlation_id: String,
    receiver: oneshot::Receiver<Vec<u8>>,
    _registration: ReplyRegistration,
}

impl ReplyChannel {
    pub fn new(
        reply_to: impl Into<String>,
        correlation_id: &str,
        router: &ReplyRouter,
    ) -> Self {
        let (receiver, registration) = router.register(correlation_id);
        Self {
            reply_to: reply_to.into(),
            correlation_id: correlation_id.to_string(),
            receiver,
            _registration: registration,
        }
    }

    /// 等待回复；路由方被关闭时返回 None
    pub async fn recv(self) -> Option<Vec<u8>> {
        let Self {
            receiver,
            _registration,
            ..
        } = self;
        receiver.await.ok()
    }
}

/// RPC 传输
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// 打开本次调用专属的回复通道
    fn open_reply_channel(&self, correlation_id: &str) -> Result<ReplyChannel>;

    /// 发布一条消息
    async fn publish(&self, message: OutboundMessage) -> Result<()>;
}
