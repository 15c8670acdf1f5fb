//! Deadline wrapper for any rail

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::rail::{PartyRef, PaymentRail, RailError, RailResult, TransactionRef};

/// Bounds every call to the inner rail by `timeout`
///
/// A timed-out capture or transfer may still complete on the rail side.
/// Callers retry with the same idempotency key to learn the outcome.
pub struct TimeoutRail<R> {
    inner: R,
    timeout: Duration,
}

impl<R: PaymentRail> TimeoutRail<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn bounded<T, F>(&self, call: F) -> RailResult<T>
    where
        F: std::future::Future<Output = RailResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(rail = self.inner.name(), timeout_secs = self.timeout.as_secs(), "rail call timed out");
                Err(RailError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

#[async_trait]
impl<R: PaymentRail> PaymentRail for TimeoutRail<R> {
    async fn capture(
        &self,
        payer: &PartyRef,
        amount: Decimal,
        idempotency_key: &str,
    ) -> RailResult<TransactionRef> {
        self.bounded(self.inner.capture(payer, amount, idempotency_key)).await
    }

    async fn transfer(
        &self,
        payee: &PartyRef,
        amount: Decimal,
        idempotency_key: &str,
    ) -> RailResult<TransactionRef> {
        self.bounded(self.inner.transfer(payee, amount, idempotency_key)).await
    }

    async fn refund(&self, transaction: &TransactionRef) -> RailResult<()> {
        self.bounded(self.inner.refund(transaction)).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
