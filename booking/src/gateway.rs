//! Resilient payment gateway wrapper.
//!
//! The gateway is slow and untrusted. Every call gets a short timeout and a
//! bounded number of retries with exponential backoff; rejections are not
//! retried. Callers decide how an exhausted call degrades.

use crate::config::PaymentConfig;
use async_trait::async_trait;
use fieldbook_core::environment::{GatewayPayment, PaymentGateway};
use fieldbook_core::error::GatewayError;
use fieldbook_core::types::{Money, OrderCode};
use fieldbook_runtime::metrics::BookingMetrics;
use fieldbook_runtime::retry::{RetryPolicy, retry_if};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Timeout + retry decorator around a [`PaymentGateway`]
#[derive(Clone)]
pub struct ResilientGateway {
    inner: Arc<dyn PaymentGateway>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ResilientGateway {
    /// Wrap `inner` with the configured timeout and retry policy
    #[must_use]
    pub fn new(inner: Arc<dyn PaymentGateway>, config: &PaymentConfig) -> Self {
        let retry = RetryPolicy::builder()
            .max_retries(config.gateway_retries)
            .initial_delay(config.gateway_backoff())
            .max_delay(config.gateway_backoff() * 8)
            .jitter(true)
            .build();
        Self::with_policy(inner, config.gateway_timeout(), retry)
    }

    /// Wrap `inner` with an explicit policy
    #[must_use]
    pub fn with_policy(inner: Arc<dyn PaymentGateway>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self { inner, timeout, retry }
    }

    async fn call<T, F, Fut>(&self, label: &'static str, operation: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let timeout = self.timeout;
        let result = retry_if(
            &self.retry,
            label,
            || {
                let attempt = operation();
                async move {
                    tokio::time::timeout(timeout, attempt)
                        .await
                        .unwrap_or(Err(GatewayError::Timeout))
                }
            },
            GatewayError::is_retryable,
        )
        .await;

        BookingMetrics::record_gateway_call(match &result {
            Ok(_) => "ok",
            Err(GatewayError::Timeout) => "timeout",
            Err(GatewayError::Unavailable(_)) => "unavailable",
            Err(GatewayError::Rejected(_)) => "rejected",
        });
        result
    }
}

#[async_trait]
impl PaymentGateway for ResilientGateway {
    async fn create_qr_url(
        &self,
        amount: Money,
        memo: &str,
        order_code: &OrderCode,
    ) -> Result<String, GatewayError> {
        self.call("gateway.create_qr_url", || {
            self.inner.create_qr_url(amount, memo, order_code)
        })
        .await
    }

    async fn check_status(&self, order_code: &OrderCode) -> Result<GatewayPayment, GatewayError> {
        self.call("gateway.check_status", || self.inner.check_status(order_code))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fieldbook_core::environment::GatewayPaymentStatus;
    use fieldbook_testing::ScriptedGateway;

    fn fast() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    #[tokio::test]
    async fn retries_outages_then_succeeds() {
        let inner = Arc::new(ScriptedGateway::new());
        inner.push_status(Err(GatewayError::Unavailable("502".into())));
        inner.push_paid("TX-9", Money::from_minor(1_000));
        let gateway = ResilientGateway::with_policy(inner.clone(), Duration::from_millis(200), fast());

        let payment = gateway.check_status(&OrderCode::new("PO1")).await.unwrap();

        assert_eq!(payment.status, GatewayPaymentStatus::Paid);
        assert_eq!(inner.status_calls(), 2);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let inner = Arc::new(ScriptedGateway::new());
        inner.push_status(Err(GatewayError::Rejected("unknown order".into())));
        let gateway = ResilientGateway::with_policy(inner.clone(), Duration::from_millis(200), fast());

        let result = gateway.check_status(&OrderCode::new("PO1")).await;

        assert!(matches!(result, Err(GatewayError::Rejected(_))));
        assert_eq!(inner.status_calls(), 1);
    }

    #[tokio::test]
    async fn slow_gateway_times_out_after_bounded_attempts() {
        let inner = Arc::new(ScriptedGateway::new());
        inner.set_latency(Duration::from_millis(200));
        let gateway = ResilientGateway::with_policy(inner.clone(), Duration::from_millis(10), fast());

        let result = gateway.create_qr_url(Money::from_minor(5), "PO1", &OrderCode::new("PO1")).await;

        assert_eq!(result, Err(GatewayError::Timeout));
        assert_eq!(inner.qr_calls(), 3);
    }
}
