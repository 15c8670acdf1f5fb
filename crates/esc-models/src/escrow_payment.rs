//! Escrow payment model
//!
//! Table: escrow_payments

use chrono::{DateTime, Utc};
use esc_core::traits::{Entity, Id, Identifiable, Lockable, Timestamped};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

/// Lifecycle of the funds behind one milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Reserved; the capture has not been confirmed by the rail yet
    #[default]
    Pending,
    Held,
    Released,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Held => "held",
            Self::Released => "released",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "held" => Ok(Self::Held),
            "released" => Ok(Self::Released),
            "refunded" => Ok(Self::Refunded),
            other => Err(ParseEnumError::new("payment status", other)),
        }
    }
}

/// Escrow payment entity
///
/// A milestone has at most one active (non-superseded) payment. Older
/// refunded payments stay behind as history with `superseded_at` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowPayment {
    pub id: Id,
    pub milestone_id: Id,
    pub amount: Decimal,
    pub status: PaymentStatus,

    /// Client-generated key sent with the capture call
    pub idempotency_key: String,

    /// Capture reference returned by the payment rail
    pub transaction_ref: Option<String>,

    /// Transfer reference returned when funds went to the contractor
    pub release_ref: Option<String>,

    pub held_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub superseded_at: Option<DateTime<Utc>>,

    pub lock_version: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowPayment {
    pub fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }

    /// Key sent with the transfer call; stable across retries
    pub fn release_key(&self) -> String {
        format!("{}-release", self.idempotency_key)
    }

    /// Key for the capture of the `attempt`-th payment of a milestone
    pub fn capture_key(milestone_id: Id, attempt: usize) -> String {
        format!("ms{}-fund{}", milestone_id, attempt)
    }
}

impl Identifiable for EscrowPayment {
    fn id(&self) -> Id {
        self.id
    }
}

impl Timestamped for EscrowPayment {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Lockable for EscrowPayment {
    fn lock_version(&self) -> i32 {
        self.lock_version
    }
}

impl Entity for EscrowPayment {
    const TABLE_NAME: &'static str = "escrow_payments";
    const TYPE_NAME: &'static str = "escrow payment";
}

/// Input for reserving a payment; status starts at `Pending`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEscrowPayment {
    pub milestone_id: Id,
    pub amount: Decimal,
    pub idempotency_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        assert_eq!(EscrowPayment::capture_key(12, 1), "ms12-fund1");
        assert_eq!(EscrowPayment::capture_key(12, 2), "ms12-fund2");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PaymentStatus::Released.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Held.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }
}
