//! 支付通知入口
//!
//! HTTP webhook 与 broker 上的支付事件是同一条对账流程的两个适配器，
//! 区别只在于如何把处置结果反馈给发送方。

pub mod payment_events;
pub mod webhook;

use cart_shared::observability::metrics;
use tracing::{info, warn};

use crate::models::PaymentNotification;
use crate::rpc::Disposition;
use crate::service::PaymentFinalizer;

pub use payment_events::{PaymentEventConsumer, handle_payment_event};
pub use webhook::{WEBHOOK_PATH, WebhookState, router};

/// 对已解析的支付通知执行对账，返回处置结果
pub async fn reconcile_notification(
    finalizer: &dyn PaymentFinalizer,
    notification: &PaymentNotification,
    source: &str,
) -> Disposition {
    if !notification.is_payment() {
        info!(source, kind = ?notification.kind, "非支付类通知，忽略");
        metrics::record_reconciliation(source, "not_payment");
        return Disposition::Ack;
    }

    let payment_id = match notification.require_payment_id() {
        Ok(id) => id,
        Err(e) => {
            warn!(source, error = %e, "支付通知缺少 ID，丢弃");
            metrics::record_reconciliation(source, e.code());
            return Disposition::Discard;
        }
    };

    match finalizer.finalize(payment_id).await {
        Ok(outcome) => {
            metrics::record_reconciliation(source, outcome.as_str());
            Disposition::Ack
        }
        Err(e) => {
            let disposition = e.disposition();
            warn!(
                source,
                payment_id,
                error = %e,
                disposition = disposition.as_str(),
                "支付对账失败"
            );
            metrics::record_reconciliation(source, e.code());
            disposition
        }
    }
}
