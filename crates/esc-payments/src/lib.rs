//! # esc-payments
//!
//! Payment rail abstraction for Escrow RS.
//!
//! - [`PaymentRail`]: capture, transfer and refund with idempotency keys
//! - [`SandboxRail`]: in-memory rail with failure injection
//! - [`TimeoutRail`]: bounds every call of an inner rail

pub mod rail;
pub mod sandbox;
pub mod timeout;

pub use rail::{PartyRef, PaymentRail, RailError, RailResult, TransactionRef};
pub use sandbox::{RailRecord, RailStats, RecordKind, SandboxRail};
pub use timeout::TimeoutRail;
