//! 日志与指标
//!
//! 服务启动时调用一次 [`init`]，返回的守卫需要保留到进程退出。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 对应配置文件的 `[observability]` 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 不在配置文件中填写，由 [`with_service_name`](Self::with_service_name) 注入
    pub service_name: String,
    pub metrics_port: u16,
    pub metrics_enabled: bool,
    /// RUST_LOG 未设置时生效
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "checkout-service".to_string(),
            metrics_port: 9090,
            metrics_enabled: true,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

pub struct ObservabilityGuard {
    _metrics: Option<metrics::MetricsHandle>,
}

/// 先装日志订阅者，再按配置启动指标端点
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        metrics_port = config.metrics_port,
        metrics_enabled = config.metrics_enabled,
        json_logs = config.json_logs,
        "可观测性已初始化"
    );

    Ok(ObservabilityGuard { _metrics: metrics })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_section_with_partial_fields() {
        let config: ObservabilityConfig =
            serde_json::from_str(r#"{"metrics_port": 9100, "json_logs": true}"#).unwrap();

        assert_eq!(config.metrics_port, 9100);
        assert!(config.json_logs);
        assert_eq!(config.log_level, "info");

        let config = config.with_service_name("checkout-service-canary");
        assert_eq!(config.service_name, "checkout-service-canary");
    }
}
