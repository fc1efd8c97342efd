//! 退避重试
//!
//! 订单事件发布等旁路操作遇到 broker 抖动时按指数退避重试。
//! 哪些错误值得重试由调用方的 `is_retryable` 决定。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// 指数退避策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次执行之外最多再试几次
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 第 `retry` 次重试前的等待时间，从 0 计
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// 总尝试次数（含首次）
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// 按策略执行异步操作
///
/// 不可重试的错误立即返回；重试耗尽后返回最后一次的错误。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut retry = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(operation = operation_name, retry, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) || retry >= policy.max_retries {
            warn!(
                operation = operation_name,
                attempts = retry + 1,
                error = %err,
                "操作失败，不再重试"
            );
            return Err(err);
        }

        let delay = policy.backoff(retry);
        warn!(
            operation = operation_name,
            retry,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "操作失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CartError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(5));
        assert_eq!(policy.attempts(), 4);
    }

    #[tokio::test]
    async fn test_transient_kafka_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_policy(&quick(3), "ORDER_CREATED", CartError::is_retryable, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CartError::Kafka("leader not available".into()))
                } else {
                    Ok(77)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 77);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_policy(&quick(2), "ORDER_PAID", CartError::is_retryable, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CartError::Kafka("broker down".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_corrupt_payloads_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_policy(&quick(5), "ORDER_CREATED", CartError::is_retryable, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CartError::Serialization(
                        serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
                    ))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
