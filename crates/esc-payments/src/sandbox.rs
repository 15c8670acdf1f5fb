//! In-memory sandbox rail
//!
//! Keeps every capture and transfer keyed by idempotency key. Failures can be
//! switched on per operation to exercise the error paths of callers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::rail::{PartyRef, PaymentRail, RailError, RailResult, TransactionRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Capture,
    Transfer,
}

/// One money movement the sandbox performed
#[derive(Debug, Clone, PartialEq)]
pub struct RailRecord {
    pub kind: RecordKind,
    pub party: PartyRef,
    pub amount: Decimal,
    pub reference: TransactionRef,
    pub refunded: bool,
}

/// Number of calls that actually moved money
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RailStats {
    pub captures: usize,
    pub transfers: usize,
    pub refunds: usize,
}

#[derive(Debug, Default)]
pub struct SandboxRail {
    /// idempotency key -> record
    records: DashMap<String, RailRecord>,
    /// transaction reference -> idempotency key
    references: DashMap<String, String>,

    fail_captures: AtomicBool,
    fail_transfers: AtomicBool,
    fail_refunds: AtomicBool,

    captures: AtomicUsize,
    transfers: AtomicUsize,
    refunds: AtomicUsize,
}

impl SandboxRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_captures(&self, fail: bool) {
        self.fail_captures.store(fail, Ordering::SeqCst);
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> RailStats {
        RailStats {
            captures: self.captures.load(Ordering::SeqCst),
            transfers: self.transfers.load(Ordering::SeqCst),
            refunds: self.refunds.load(Ordering::SeqCst),
        }
    }

    /// The record stored under an idempotency key
    pub fn record(&self, idempotency_key: &str) -> Option<RailRecord> {
        self.records.get(idempotency_key).map(|r| r.clone())
    }

    pub fn is_refunded(&self, transaction: &TransactionRef) -> bool {
        self.references
            .get(transaction.as_str())
            .and_then(|key| self.records.get(key.value()).map(|r| r.refunded))
            .unwrap_or(false)
    }

    fn execute(
        &self,
        kind: RecordKind,
        party: &PartyRef,
        amount: Decimal,
        idempotency_key: &str,
    ) -> RailResult<TransactionRef> {
        if amount <= Decimal::ZERO {
            return Err(RailError::Declined(format!("amount {} must be positive", amount)));
        }

        match self.records.entry(idempotency_key.to_string()) {
            Entry::Occupied(existing) => {
                let record = existing.get();
                if record.kind != kind || record.party != *party || record.amount != amount {
                    return Err(RailError::KeyReused(idempotency_key.to_string()));
                }
                if record.refunded {
                    return Err(RailError::Refunded(record.reference.to_string()));
                }
                debug!(key = idempotency_key, reference = %record.reference, "replayed idempotent call");
                Ok(record.reference.clone())
            }
            Entry::Vacant(slot) => {
                let prefix = match kind {
                    RecordKind::Capture => "cap",
                    RecordKind::Transfer => "trf",
                };
                let reference = TransactionRef::new(format!("{}_{}", prefix, Uuid::new_v4().simple()));
                self.references
                    .insert(reference.as_str().to_string(), idempotency_key.to_string());
                slot.insert(RailRecord {
                    kind,
                    party: party.clone(),
                    amount,
                    reference: reference.clone(),
                    refunded: false,
                });
                let counter = match kind {
                    RecordKind::Capture => &self.captures,
                    RecordKind::Transfer => &self.transfers,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(reference)
            }
        }
    }
}

#[async_trait]
impl PaymentRail for SandboxRail {
    #[instrument(skip(self), fields(rail = "sandbox"))]
    async fn capture(
        &self,
        payer: &PartyRef,
        amount: Decimal,
        idempotency_key: &str,
    ) -> RailResult<TransactionRef> {
        if self.fail_captures.load(Ordering::SeqCst) {
            return Err(RailError::Declined("card declined".to_string()));
        }
        self.execute(RecordKind::Capture, payer, amount, idempotency_key)
    }

    #[instrument(skip(self), fields(rail = "sandbox"))]
    async fn transfer(
        &self,
        payee: &PartyRef,
        amount: Decimal,
        idempotency_key: &str,
    ) -> RailResult<TransactionRef> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(RailError::Unavailable("payout service unavailable".to_string()));
        }
        self.execute(RecordKind::Transfer, payee, amount, idempotency_key)
    }

    #[instrument(skip(self), fields(rail = "sandbox"))]
    async fn refund(&self, transaction: &TransactionRef) -> RailResult<()> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(RailError::Unavailable("refund service unavailable".to_string()));
        }
        let key = self
            .references
            .get(transaction.as_str())
            .map(|k| k.value().clone())
            .ok_or_else(|| RailError::UnknownTransaction(transaction.to_string()))?;

        let mut record = self
            .records
            .get_mut(&key)
            .ok_or_else(|| RailError::UnknownTransaction(transaction.to_string()))?;
        if record.kind != RecordKind::Capture {
            return Err(RailError::Declined(format!("{} is not a capture", transaction)));
        }
        if !record.refunded {
            record.refunded = true;
            self.refunds.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sandbox"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn euros(amount: i64) -> Decimal {
        Decimal::new(amount, 0)
    }

    #[tokio::test]
    async fn test_capture_is_idempotent_per_key() {
        let rail = SandboxRail::new();
        let payer = PartyRef::user(1);

        let first = rail.capture(&payer, euros(1000), "ms1-fund1").await.unwrap();
        let again = rail.capture(&payer, euros(1000), "ms1-fund1").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(rail.stats().captures, 1);

        let other = rail.capture(&payer, euros(1000), "ms1-fund2").await.unwrap();
        assert_ne!(first, other);
        assert_eq!(rail.stats().captures, 2);
    }

    #[tokio::test]
    async fn test_key_reuse_with_different_amount() {
        let rail = SandboxRail::new();
        let payer = PartyRef::user(1);
        rail.capture(&payer, euros(1000), "k").await.unwrap();
        let result = rail.capture(&payer, euros(999), "k").await;
        assert_eq!(result, Err(RailError::KeyReused("k".to_string())));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let rail = SandboxRail::new();
        rail.fail_captures(true);
        assert!(matches!(
            rail.capture(&PartyRef::user(1), euros(10), "k").await,
            Err(RailError::Declined(_))
        ));
        assert_eq!(rail.stats().captures, 0);
        assert!(rail.record("k").is_none());

        rail.fail_captures(false);
        assert!(rail.capture(&PartyRef::user(1), euros(10), "k").await.is_ok());

        rail.fail_transfers(true);
        assert!(rail.transfer(&PartyRef::user(2), euros(10), "k-release").await.is_err());
    }

    #[tokio::test]
    async fn test_refund_once() {
        let rail = SandboxRail::new();
        let reference = rail.capture(&PartyRef::user(1), euros(500), "k").await.unwrap();

        rail.refund(&reference).await.unwrap();
        rail.refund(&reference).await.unwrap();
        assert!(rail.is_refunded(&reference));
        assert_eq!(rail.stats().refunds, 1);

        // The key cannot hand out the returned capture again
        assert_eq!(
            rail.capture(&PartyRef::user(1), euros(500), "k").await,
            Err(RailError::Refunded(reference.to_string()))
        );
        assert_eq!(rail.stats().captures, 1);

        let unknown = TransactionRef::new("cap_missing");
        assert!(matches!(
            rail.refund(&unknown).await,
            Err(RailError::UnknownTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_transfers_cannot_be_refunded() {
        let rail = SandboxRail::new();
        let reference = rail.transfer(&PartyRef::user(2), euros(500), "k-release").await.unwrap();
        assert!(matches!(rail.refund(&reference).await, Err(RailError::Declined(_))));
        assert_eq!(rail.record("k-release").unwrap().kind, RecordKind::Transfer);
    }
}
