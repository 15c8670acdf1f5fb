//! # esc-models
//!
//! Domain models for Escrow RS.
//!
//! This crate contains the entity structs persisted by `esc-db`: users,
//! projects, milestones, escrow payments and milestone reviews. Each model
//! implements the core traits from `esc-core` (Entity, Identifiable, Lockable).

pub use esc_core::traits::{Entity, Id, Identifiable, Lockable, ProjectScoped, Timestamped};

pub mod escrow_payment;
pub mod milestone;
pub mod project;
pub mod review;
pub mod user;

pub use escrow_payment::{EscrowPayment, NewEscrowPayment, PaymentStatus};
pub use milestone::{Milestone, MilestoneStatus, MilestoneTransition, NewMilestone};
pub use project::{NewProject, Project, ProjectStatus};
pub use review::{MilestoneReview, NewMilestoneReview, ReviewDecision};
pub use user::{NewUser, User, UserRole};

/// Error returned when a persisted status string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
