//! HTTP 中间件
//!
//! webhook 路由共用：请求 ID 透传与请求级 span、指标。

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span};

use super::metrics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 为每个请求开 span，结束时记录状态码、耗时与指标
///
/// 指标的 path 标签取路由模板，未匹配的路径统一记为 `unmatched`，避免标签膨胀。
pub async fn http_tracing(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let span = info_span!(
        "http_request",
        %method,
        uri = %request.uri().path(),
        %request_id,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let latency = start.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);
    metrics::record_http_request(&method, &path, status, latency.as_secs_f64());

    response
}

/// 沿用调用方的 x-request-id，缺失时生成，并写回请求头与响应头
///
/// 需要挂在 [`http_tracing`] 外层，span 才能拿到生成的 ID。
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = match request.headers().get(REQUEST_ID_HEADER) {
        Some(value) if !value.is_empty() => value.clone(),
        _ => {
            let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string());
            match generated {
                Ok(value) => {
                    request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
                    value
                }
                Err(_) => return next.run(request).await,
            }
        }
    };

    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, id);
    response
}
