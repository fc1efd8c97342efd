//! 指标
//!
//! 安装 Prometheus recorder，并在独立端口上暴露抓取端点。
//! 业务代码只调用下面的 `record_*`，不直接拼指标名。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 抓取端点的后台任务，随守卫一起存活
pub struct MetricsHandle {
    _exporter: tokio::task::JoinHandle<()>,
}

pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let exporter = serve_exporter(addr, handle).await?;

    Ok(MetricsHandle {
        _exporter: exporter,
    })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("rpc_calls_total", "Total number of outbound RPC calls");
    metrics::describe_histogram!(
        "rpc_call_duration_seconds",
        "Outbound RPC call duration in seconds"
    );

    metrics::describe_counter!(
        "rpc_requests_handled_total",
        "Total number of inbound RPC requests dispatched"
    );
    metrics::describe_histogram!(
        "rpc_request_duration_seconds",
        "Inbound RPC handler duration in seconds"
    );

    metrics::describe_counter!("checkouts_total", "Total number of checkout attempts");
    metrics::describe_counter!(
        "payment_reconciliations_total",
        "Total number of payment reconciliations"
    );
    metrics::describe_counter!(
        "order_events_published_total",
        "Total number of order domain events published"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn serve_exporter(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new().route("/metrics", get(move || std::future::ready(handle.render())));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标端点已启动");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标端点退出");
        }
    }))
}

#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels).record(duration_secs);
}

/// 记录一次出站 RPC 调用
///
/// status 取值：success / remote_error / timeout / no_body / transport_error
#[inline]
pub fn record_rpc_call(pattern: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "rpc_calls_total",
        "pattern" => pattern.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "rpc_call_duration_seconds",
        "pattern" => pattern.to_string()
    )
    .record(duration_secs);
}

/// 记录一次入站 RPC 请求的处理结果
#[inline]
pub fn record_rpc_request(pattern: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "rpc_requests_handled_total",
        "pattern" => pattern.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "rpc_request_duration_seconds",
        "pattern" => pattern.to_string()
    )
    .record(duration_secs);
}

/// 记录结算结果
#[inline]
pub fn record_checkout(status: &str) {
    metrics::counter!("checkouts_total", "status" => status.to_string()).increment(1);
}

/// 记录支付对账结果
#[inline]
pub fn record_reconciliation(source: &str, outcome: &str) {
    metrics::counter!(
        "payment_reconciliations_total",
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录订单事件发布结果
#[inline]
pub fn record_order_event(event_type: &str, status: &str) {
    metrics::counter!(
        "order_events_published_total",
        "event_type" => event_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
