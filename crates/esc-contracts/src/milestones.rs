//! Milestone workflow contracts
//!
//! Pure preconditions of the milestone state machine. Services evaluate these
//! against a snapshot before writing anything; the store's compare-and-set
//! then guarantees the snapshot was still current when the write landed.

use esc_core::error::{EscrowError, ValidationErrors};
use esc_models::{
    EscrowPayment, Milestone, MilestoneStatus, MilestoneTransition, PaymentStatus, Project,
    ProjectStatus,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::base::{is_blank, merge_validator_errors, Contract, ValidationResult};

/// Optional notes attached to an approval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDetails {
    #[validate(length(max = 2000, message = "is too long (maximum is 2000 characters)"))]
    pub notes: Option<String>,
}

impl ApprovalDetails {
    pub fn with_notes(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
        }
    }
}

/// Mandatory reason attached to a rejection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectionDetails {
    #[validate(length(max = 2000, message = "is too long (maximum is 2000 characters)"))]
    pub reason: String,
}

impl RejectionDetails {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReviewContract;

impl Contract<ApprovalDetails> for ReviewContract {
    fn validate(&self, input: &ApprovalDetails) -> ValidationResult {
        let mut errors = ValidationErrors::new();
        if let Err(source) = input.validate() {
            merge_validator_errors(&mut errors, "", &source);
        }
        errors.into_result()
    }
}

impl Contract<RejectionDetails> for ReviewContract {
    fn validate(&self, input: &RejectionDetails) -> ValidationResult {
        let mut errors = ValidationErrors::new();
        if is_blank(&input.reason) {
            errors.add("reason", "can't be blank");
        }
        if let Err(source) = input.validate() {
            merge_validator_errors(&mut errors, "", &source);
        }
        errors.into_result()
    }
}

fn invalid(milestone: &Milestone, transition: &'static str, message: impl Into<String>) -> EscrowError {
    EscrowError::invalid_state("milestone", milestone.id, transition, message)
}

/// Precondition for funding a milestone
///
/// The milestone must still be pending and must not already carry a live
/// payment. A refunded active payment is allowed; it gets superseded.
pub fn check_fundable(
    project: &Project,
    milestone: &Milestone,
    active_payment: Option<&EscrowPayment>,
) -> Result<(), EscrowError> {
    if !ProjectStatus::FUNDABLE.contains(&project.status) {
        return Err(invalid(
            milestone,
            "fund",
            format!("project is {}", project.status.as_str()),
        ));
    }
    if milestone.status != MilestoneStatus::Pending {
        return Err(invalid(
            milestone,
            "fund",
            format!("milestone is {}", milestone.status.as_str()),
        ));
    }
    match active_payment.map(|p| p.status) {
        None | Some(PaymentStatus::Refunded) => Ok(()),
        Some(PaymentStatus::Pending) => Err(invalid(milestone, "fund", "funding is already in progress")),
        Some(status) => Err(invalid(
            milestone,
            "fund",
            format!("milestone already has a {} payment", status.as_str()),
        )),
    }
}

/// Precondition for a work transition; returns the target status
///
/// Milestone status is checked first, so a milestone that moved on reports
/// `InvalidState`. A pending milestone without a held payment reports
/// `NotFunded` before the project status is looked at.
pub fn check_transition(
    transition: MilestoneTransition,
    project: &Project,
    milestone: &Milestone,
    active_payment: Option<&EscrowPayment>,
) -> Result<MilestoneStatus, EscrowError> {
    let target = milestone.status.apply(transition).ok_or_else(|| {
        invalid(
            milestone,
            transition.name(),
            format!(
                "milestone is {}, expected {}",
                milestone.status.as_str(),
                transition.from_status().as_str()
            ),
        )
    })?;

    let payment_held = matches!(active_payment, Some(p) if p.status == PaymentStatus::Held);

    match transition {
        MilestoneTransition::Start => {
            if !payment_held {
                return Err(EscrowError::NotFunded {
                    milestone_id: milestone.id,
                });
            }
            if !ProjectStatus::WORKABLE.contains(&project.status) {
                return Err(invalid(
                    milestone,
                    transition.name(),
                    format!("project is {}", project.status.as_str()),
                ));
            }
        }
        MilestoneTransition::Approve => {
            if !payment_held {
                return Err(invalid(milestone, transition.name(), "escrow payment is not held"));
            }
        }
        MilestoneTransition::Submit
        | MilestoneTransition::Reject
        | MilestoneTransition::Settle
        | MilestoneTransition::RevertApproval => {}
    }

    Ok(target)
}
