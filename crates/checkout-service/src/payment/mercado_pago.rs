//! Mercado Pago REST 客户端
//!
//! - `POST /checkout/preferences` 创建支付偏好，返回 init_point
//! - `GET /v1/payments/{id}` 查询支付状态

use std::time::Duration;

use async_trait::async_trait;
use cart_shared::config::PaymentConfig;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::gateway::PaymentGateway;
use crate::error::{CheckoutError, Result};
use crate::ingress::webhook::WEBHOOK_PATH;
use crate::models::{OrderItem, PaymentStatusDetails};

#[derive(Debug, Serialize)]
struct PreferenceItem<'a> {
    title: &'a str,
    quantity: i32,
    unit_price: i64,
}

#[derive(Debug, Serialize)]
struct BackUrls {
    success: String,
    failure: String,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest<'a> {
    items: Vec<PreferenceItem<'a>>,
    external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    back_urls: Option<BackUrls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<String>,
    auto_return: &'static str,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    init_point: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    status: String,
    #[serde(default, deserialize_with = "optional_reference")]
    external_reference: Option<String>,
}

fn optional_reference<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub struct MercadoPagoClient {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
    frontend_url: Option<String>,
    webhook_base_url: Option<String>,
}

impl MercadoPagoClient {
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        if config.access_token.trim().is_empty() {
            return Err(CheckoutError::Validation(
                "支付网关 access token 不能为空".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CheckoutError::Gateway(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            access_token: config.access_token.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            frontend_url: non_empty(config.frontend_url.as_deref()),
            webhook_base_url: non_empty(config.webhook_base_url.as_deref()),
        })
    }

    fn preference<'a>(&self, order_id: i64, items: &'a [OrderItem]) -> PreferenceRequest<'a> {
        PreferenceRequest {
            items: items
                .iter()
                .map(|item| PreferenceItem {
                    title: &item.name_snapshot,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            external_reference: order_id.to_string(),
            back_urls: self.frontend_url.as_ref().map(|base| BackUrls {
                success: format!("{base}/success"),
                failure: format!("{base}/failed"),
            }),
            notification_url: self
                .webhook_base_url
                .as_ref()
                .map(|base| format!("{base}{WEBHOOK_PATH}")),
            auto_return: "approved",
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().trim_end_matches('/'))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    #[instrument(skip(self, items), fields(lines = items.len()))]
    async fn create_payment(
        &self,
        order_id: i64,
        total: i64,
        items: &[OrderItem],
    ) -> Result<String> {
        let request = self.preference(order_id, items);

        let resp = self
            .http
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| CheckoutError::Gateway(format!("请求支付网关失败: {e}")))?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            warn!(order_id, status = status.as_u16(), body = %body, "创建支付偏好失败");
            return Err(CheckoutError::Gateway(format!(
                "创建支付偏好返回 HTTP {status}: {body}"
            )));
        }

        let preference: PreferenceResponse = resp
            .json()
            .await
            .map_err(|e| CheckoutError::Gateway(format!("支付偏好响应无法解析: {e}")))?;

        debug!(order_id, total, "支付偏好已创建");
        Ok(preference.init_point)
    }

    #[instrument(skip(self))]
    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatusDetails> {
        // 支付 ID 来自未鉴权的 webhook，只接受网关使用的纯数字 ID
        if payment_id.is_empty() || !payment_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CheckoutError::MalformedMessage(format!(
                "非法的支付 ID: {payment_id}"
            )));
        }

        let resp = self
            .http
            .get(format!("{}/v1/payments/{}", self.base_url, payment_id))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| CheckoutError::Gateway(format!("请求支付网关失败: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CheckoutError::PaymentNotFound(payment_id.to_string()));
        }
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(CheckoutError::Gateway(format!(
                "查询支付返回 HTTP {status}: {body}"
            )));
        }

        let payment: PaymentResponse = resp
            .json()
            .await
            .map_err(|e| CheckoutError::Gateway(format!("支付详情无法解析: {e}")))?;

        Ok(PaymentStatusDetails {
            status: payment.status,
            external_reference: payment.external_reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(base_url: &str) -> PaymentConfig {
        PaymentConfig {
            access_token: "TEST-token".into(),
            base_url: base_url.into(),
            frontend_url: Some("https://shop.example/".into()),
            webhook_base_url: Some("https://api.example".into()),
            ..Default::default()
        }
    }

    fn items() -> Vec<OrderItem> {
        vec![OrderItem {
            product_id: "p1".into(),
            name_snapshot: "Polera".into(),
            unit_price: 1000,
            quantity: 5,
        }]
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_empty_token_rejected() {
        let mut cfg = config("http://localhost");
        cfg.access_token = "  ".into();
        assert!(MercadoPagoClient::new(&cfg).is_err());
    }

    #[test]
    fn test_preference_shape() {
        let client = MercadoPagoClient::new(&config("http://localhost")).unwrap();
        let items = items();
        let json = serde_json::to_value(client.preference(77, &items)).unwrap();

        assert_eq!(json["external_reference"], "77");
        assert_eq!(json["items"][0]["title"], "Polera");
        assert_eq!(json["items"][0]["unit_price"], 1000);
        assert_eq!(json["back_urls"]["success"], "https://shop.example/success");
        assert_eq!(json["back_urls"]["failure"], "https://shop.example/failed");
        assert_eq!(
            json["notification_url"],
            format!("https://api.example{WEBHOOK_PATH}")
        );
        assert_eq!(json["auto_return"], "approved");
    }

    #[test]
    fn test_preference_omits_unset_urls() {
        let mut cfg = config("http://localhost");
        cfg.frontend_url = None;
        cfg.webhook_base_url = Some(String::new());
        let client = MercadoPagoClient::new(&cfg).unwrap();
        let json = serde_json::to_value(client.preference(1, &[])).unwrap();

        assert!(json.get("back_urls").is_none());
        assert!(json.get("notification_url").is_none());
    }

    #[tokio::test]
    async fn test_create_payment_returns_init_point() {
        let router = Router::new().route(
            "/checkout/preferences",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer TEST-token");
                assert_eq!(body["external_reference"], "77");
                (
                    axum::http::StatusCode::CREATED,
                    Json(json!({"id": "pref-1", "init_point": "https://mp/init/pref-1"})),
                )
            }),
        );
        let base = serve(router).await;

        let client = MercadoPagoClient::new(&config(&base)).unwrap();
        let url = client.create_payment(77, 5000, &items()).await.unwrap();
        assert_eq!(url, "https://mp/init/pref-1");
    }

    #[tokio::test]
    async fn test_payment_status_and_not_found() {
        let router = Router::new().route(
            "/v1/payments/{id}",
            get(|Path(id): Path<String>| async move {
                if id == "123" {
                    (
                        axum::http::StatusCode::OK,
                        Json(json!({"id": 123, "status": "approved", "external_reference": "77"})),
                    )
                } else {
                    (axum::http::StatusCode::NOT_FOUND, Json(json!({"message": "not found"})))
                }
            }),
        );
        let base = serve(router).await;
        let client = MercadoPagoClient::new(&config(&base)).unwrap();

        let details = client.payment_status("123").await.unwrap();
        assert_eq!(details.status, "approved");
        assert_eq!(details.external_reference.as_deref(), Some("77"));

        let err = client.payment_status("999").await.unwrap_err();
        assert!(matches!(err, CheckoutError::PaymentNotFound(_)));
    }

    #[tokio::test]
    async fn test_non_numeric_payment_id_is_rejected_before_request() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                axum::http::StatusCode::OK
            }
        });
        let base = serve(router).await;
        let client = MercadoPagoClient::new(&config(&base)).unwrap();

        for id in ["../users/me", "123?x=1", "", "12a"] {
            let err = client.payment_status(id).await.unwrap_err();
            assert!(matches!(err, CheckoutError::MalformedMessage(_)), "{id}");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gateway_error_status() {
        let router = Router::new().route(
            "/checkout/preferences",
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let base = serve(router).await;
        let client = MercadoPagoClient::new(&config(&base)).unwrap();

        let err = client.create_payment(1, 100, &items()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Gateway(_)));
        assert!(err.is_retryable());
    }
}
