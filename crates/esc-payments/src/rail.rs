//! Payment rail abstraction
//!
//! A rail moves money: it captures funds from a payer into escrow, transfers
//! escrowed funds to a payee, and refunds a capture. Capture and transfer are
//! idempotent per key; repeating a call with the same key returns the
//! original reference without moving money again, unless that capture was
//! refunded meanwhile.

use std::fmt;

use async_trait::async_trait;
use esc_core::traits::Id;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rail errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RailError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("payment rail unavailable: {0}")]
    Unavailable(String),

    #[error("payment rail timed out after {0}s")]
    Timeout(u64),

    #[error("unknown transaction {0}")]
    UnknownTransaction(String),

    #[error("idempotency key {0} was used for a different request")]
    KeyReused(String),

    /// A replayed capture whose funds were already returned to the payer
    #[error("capture {0} was refunded")]
    Refunded(String),
}

pub type RailResult<T> = Result<T, RailError>;

/// Account of a party on the rail
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyRef(String);

impl PartyRef {
    /// The rail account of a platform user
    pub fn user(id: Id) -> Self {
        Self(format!("user:{}", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference the rail hands out for a capture or transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionRef(String);

impl TransactionRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payment rail trait - unified interface for payment providers
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Take `amount` from the payer into escrow
    async fn capture(
        &self,
        payer: &PartyRef,
        amount: Decimal,
        idempotency_key: &str,
    ) -> RailResult<TransactionRef>;

    /// Pay `amount` out of escrow to the payee
    async fn transfer(
        &self,
        payee: &PartyRef,
        amount: Decimal,
        idempotency_key: &str,
    ) -> RailResult<TransactionRef>;

    /// Return a capture to its payer; refunding twice is a no-op
    async fn refund(&self, transaction: &TransactionRef) -> RailResult<()>;

    /// Rail name for logging
    fn name(&self) -> &'static str;
}
