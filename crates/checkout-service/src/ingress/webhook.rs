//! 支付 webhook
//!
//! 状态码约定：格式错误 400；确认或丢弃 200；需要重投或超时 500，由网关重发。

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use cart_shared::observability::middleware as obs_middleware;
use tracing::{error, warn};

use super::reconcile_notification;
use crate::models::PaymentNotification;
use crate::rpc::Disposition;
use crate::service::PaymentFinalizer;

pub const WEBHOOK_PATH: &str = "/payments/webhook";

#[derive(Clone)]
pub struct WebhookState {
    pub finalizer: Arc<dyn PaymentFinalizer>,
    /// 单个通知（含对账）的处理时限
    pub request_timeout: Duration,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(payment_webhook))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

async fn payment_webhook(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    let notification = match PaymentNotification::parse(&body) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "webhook 请求体无法解析");
            return StatusCode::BAD_REQUEST;
        }
    };

    let reconcile = reconcile_notification(state.finalizer.as_ref(), &notification, "webhook");
    match tokio::time::timeout(state.request_timeout, reconcile).await {
        Ok(Disposition::Ack | Disposition::Discard) => StatusCode::OK,
        Ok(Disposition::Requeue) => StatusCode::INTERNAL_SERVER_ERROR,
        Err(_) => {
            error!(
                payment_id = ?notification.payment_id,
                timeout_secs = state.request_timeout.as_secs(),
                "webhook 对账超时"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "checkout-service"
    }))
}
