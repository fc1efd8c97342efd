//! 日志订阅者
//!
//! `json_logs` 打开时输出 JSON 并在 span 关闭时记一条，便于按 request_id 聚合。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// RUST_LOG 优先；配置的级别写错时退回 info
fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 全局订阅者只能装一次，重复调用返回错误
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let fmt_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_is_used_without_rust_log() {
        let config = ObservabilityConfig {
            log_level: "debug".to_string(),
            ..Default::default()
        };
        let filter = env_filter(&config);
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(filter.to_string(), "debug");
        }
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = ObservabilityConfig::default();
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
