//! Writes shared by the ledger and the workflow
//!
//! Project status follows its milestones: the first funded milestone
//! activates it, the first started one puts it in progress, and the last paid
//! one completes it.

use esc_core::result::EscrowResult;
use esc_core::traits::Id;
use esc_db::{EntityStore, WriteBatch};
use esc_models::{Milestone, MilestoneStatus, MilestoneTransition, NewMilestoneReview, ProjectStatus, ReviewDecision};
use tracing::{error, info};

/// Statuses a project leaves when its first milestone is funded
pub(crate) const AWAITING_FUNDS: &[ProjectStatus] =
    &[ProjectStatus::Draft, ProjectStatus::PendingContractor];

/// Statuses a project completes from
pub(crate) const COMPLETABLE: &[ProjectStatus] = &[ProjectStatus::Active, ProjectStatus::InProgress];

/// Writes committed together with a successful capture
pub(crate) fn funding_writes(project_id: Id) -> WriteBatch {
    WriteBatch::new()
        .guard_project_status(project_id, ProjectStatus::FUNDABLE)
        .promote_project(project_id, AWAITING_FUNDS, ProjectStatus::Active)
}

/// Writes committed together with a successful transfer
///
/// `claimed` is the milestone as it stands in APPROVED.
pub(crate) fn settle_writes(claimed: &Milestone, reviewer_id: Id, notes: Option<String>) -> WriteBatch {
    let mut paid = claimed.clone();
    paid.status = MilestoneTransition::Settle.to_status();
    WriteBatch::new()
        .update_milestone(paid)
        .insert_review(NewMilestoneReview {
            milestone_id: claimed.id,
            reviewer_id,
            decision: ReviewDecision::Approved,
            notes,
        })
}

/// Put an APPROVED milestone back to SUBMITTED after a failed payout
pub(crate) async fn revert_approval(store: &dyn EntityStore, claimed: &Milestone) {
    let mut submitted = claimed.clone();
    submitted.status = MilestoneTransition::RevertApproval.to_status();
    if let Err(err) = store.apply(WriteBatch::new().update_milestone(submitted)).await {
        error!(
            milestone_id = claimed.id,
            error = %err,
            "could not revert approval; milestone left for reconciliation"
        );
    }
}

/// Complete the project once every milestone is paid
pub(crate) async fn complete_if_paid(store: &dyn EntityStore, project_id: Id) -> EscrowResult<bool> {
    let milestones = store.milestones_for_project(project_id).await?;
    if milestones.is_empty() || milestones.iter().any(|m| m.status != MilestoneStatus::Paid) {
        return Ok(false);
    }
    store
        .apply(WriteBatch::new().promote_project(project_id, COMPLETABLE, ProjectStatus::Completed))
        .await?;
    info!(project_id, "project completed");
    Ok(true)
}
