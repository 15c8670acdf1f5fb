//! Milestone workflow engine
//!
//! PENDING -> IN_PROGRESS -> SUBMITTED -> APPROVED -> PAID, with rejection
//! sending a submission back to IN_PROGRESS. Every operation authorizes the
//! actor, checks the pure preconditions against a snapshot, and then writes
//! one compare-and-set batch. Of two racing transitions on one milestone,
//! exactly one commits; the other fails with `InvalidState`.

use std::sync::Arc;

use esc_auth::{authorize, Action, Actor, ProjectAccess};
use esc_contracts::milestones::{
    check_fundable, check_transition, ApprovalDetails, RejectionDetails, ReviewContract,
};
use esc_contracts::Contract;
use esc_core::error::EscrowError;
use esc_core::result::EscrowResult;
use esc_core::traits::Id;
use esc_db::{EntityStore, WriteBatch};
use esc_models::{
    Milestone, MilestoneTransition, NewMilestoneReview, PaymentStatus, Project, ProjectStatus,
    ReviewDecision,
};
use esc_payments::PartyRef;
use tracing::{info, instrument, warn};

use crate::ledger::{payee_of, EscrowLedger};
use crate::lifecycle;
use crate::views::{self, MilestoneView, ProjectView};

pub struct MilestoneWorkflow {
    store: Arc<dyn EntityStore>,
    ledger: Arc<EscrowLedger>,
}

impl MilestoneWorkflow {
    pub fn new(store: Arc<dyn EntityStore>, ledger: Arc<EscrowLedger>) -> Self {
        Self { store, ledger }
    }

    /// Load project and milestone and authorize the action on them
    async fn prepare(
        &self,
        project_id: Id,
        milestone_id: Id,
        actor: &Actor,
        action: Action,
    ) -> EscrowResult<(Project, Milestone)> {
        let project = views::load_project(self.store.as_ref(), project_id).await?;
        authorize(actor, action, &ProjectAccess::from(&project))?;
        let milestone = views::load_milestone(self.store.as_ref(), project_id, milestone_id).await?;
        Ok((project, milestone))
    }

    async fn view(&self, milestone_id: Id, actor: &Actor) -> EscrowResult<MilestoneView> {
        let milestone = self
            .store
            .find_milestone(milestone_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("milestone", milestone_id))?;
        views::milestone_view(self.store.as_ref(), milestone, actor).await
    }

    /// Customer puts the milestone amount into escrow
    #[instrument(skip(self))]
    pub async fn fund(&self, project_id: Id, milestone_id: Id, actor: &Actor) -> EscrowResult<MilestoneView> {
        let (project, milestone) = self
            .prepare(project_id, milestone_id, actor, Action::FundMilestone)
            .await?;
        let active = self.store.active_payment(milestone.id).await?;
        check_fundable(&project, &milestone, active.as_ref())?;

        self.ledger
            .fund_with(
                milestone.id,
                &PartyRef::user(project.customer_id),
                lifecycle::funding_writes(project.id),
            )
            .await?;

        info!(project_id, milestone_id, "milestone funded");
        self.view(milestone.id, actor).await
    }

    /// Assigned contractor starts work on a funded milestone
    #[instrument(skip(self))]
    pub async fn start(&self, project_id: Id, milestone_id: Id, actor: &Actor) -> EscrowResult<MilestoneView> {
        let (project, milestone) = self
            .prepare(project_id, milestone_id, actor, Action::StartMilestone)
            .await?;
        let active = self.store.active_payment(milestone.id).await?;
        let target = check_transition(MilestoneTransition::Start, &project, &milestone, active.as_ref())?;

        let mut started = milestone;
        started.status = target;
        self.store
            .apply(
                WriteBatch::new()
                    .guard_project_status(project.id, ProjectStatus::WORKABLE)
                    .update_milestone(started)
                    .promote_project(project.id, &[ProjectStatus::Active], ProjectStatus::InProgress),
            )
            .await?;

        info!(project_id, milestone_id, "milestone started");
        self.view(milestone_id, actor).await
    }

    /// Assigned contractor hands the work in for review
    #[instrument(skip(self))]
    pub async fn submit(&self, project_id: Id, milestone_id: Id, actor: &Actor) -> EscrowResult<MilestoneView> {
        let (project, milestone) = self
            .prepare(project_id, milestone_id, actor, Action::SubmitMilestone)
            .await?;
        let active = self.store.active_payment(milestone.id).await?;
        let target = check_transition(MilestoneTransition::Submit, &project, &milestone, active.as_ref())?;

        let mut submitted = milestone;
        submitted.status = target;
        self.store
            .apply(WriteBatch::new().update_milestone(submitted))
            .await?;

        info!(project_id, milestone_id, "milestone submitted");
        self.view(milestone_id, actor).await
    }

    /// Customer accepts the work and the held funds go to the contractor
    ///
    /// The milestone is claimed as APPROVED before the transfer. A failed
    /// transfer puts it back to SUBMITTED with the payment still HELD; a
    /// successful one commits PAID, RELEASED and the approval review
    /// together. When that commit fails the milestone stays APPROVED for
    /// [`EscrowLedger::reconcile`] to settle.
    #[instrument(skip(self, details))]
    pub async fn approve(
        &self,
        project_id: Id,
        milestone_id: Id,
        actor: &Actor,
        details: ApprovalDetails,
    ) -> EscrowResult<MilestoneView> {
        let (project, milestone) = self
            .prepare(project_id, milestone_id, actor, Action::ApproveMilestone)
            .await?;
        ReviewContract.validate(&details)?;
        let active = self.store.active_payment(milestone.id).await?;
        let target = check_transition(MilestoneTransition::Approve, &project, &milestone, active.as_ref())?;
        let payee = payee_of(&project, milestone.id)?;

        let mut claimed = milestone;
        claimed.status = target;
        self.store
            .apply(WriteBatch::new().update_milestone(claimed.clone()))
            .await?;
        // apply bumps the version by one
        claimed.lock_version += 1;

        let settle = lifecycle::settle_writes(&claimed, actor.user_id, details.notes);
        if let Err(err) = self.ledger.release_with(claimed.id, &payee, settle).await {
            if matches!(err, EscrowError::PaymentReleaseFailed { .. }) {
                warn!(project_id, milestone_id, error = %err, "approval rolled back");
                lifecycle::revert_approval(self.store.as_ref(), &claimed).await;
            } else {
                // The transfer may have gone through; reconciliation settles it
                warn!(project_id, milestone_id, error = %err, "approval left for reconciliation");
            }
            return Err(err);
        }

        info!(project_id, milestone_id, "milestone approved and paid");
        lifecycle::complete_if_paid(self.store.as_ref(), project.id).await?;
        self.view(milestone_id, actor).await
    }

    /// Customer sends the work back; the funds stay in escrow
    #[instrument(skip(self, details))]
    pub async fn reject(
        &self,
        project_id: Id,
        milestone_id: Id,
        actor: &Actor,
        details: RejectionDetails,
    ) -> EscrowResult<MilestoneView> {
        let (project, milestone) = self
            .prepare(project_id, milestone_id, actor, Action::RejectMilestone)
            .await?;
        ReviewContract.validate(&details)?;
        let active = self.store.active_payment(milestone.id).await?;
        let target = check_transition(MilestoneTransition::Reject, &project, &milestone, active.as_ref())?;

        let mut reworked = milestone;
        reworked.status = target;
        self.store
            .apply(
                WriteBatch::new()
                    .update_milestone(reworked)
                    .insert_review(NewMilestoneReview {
                        milestone_id,
                        reviewer_id: actor.user_id,
                        decision: ReviewDecision::Rejected,
                        notes: Some(details.reason.trim().to_string()),
                    }),
            )
            .await?;

        info!(project_id, milestone_id, "milestone rejected");
        self.view(milestone_id, actor).await
    }

    /// Customer cancels the project and gets every held payment back
    ///
    /// The project is claimed as CANCELLED first, which stops new funding
    /// and work from committing. Calling this again on a cancelled project
    /// retries the refunds that failed before.
    #[instrument(skip(self))]
    pub async fn cancel_project(&self, project_id: Id, actor: &Actor) -> EscrowResult<ProjectView> {
        let project = views::load_project(self.store.as_ref(), project_id).await?;
        authorize(actor, Action::CancelProject, &ProjectAccess::from(&project))?;

        let milestones = self.store.milestones_for_project(project_id).await?;
        match project.status {
            ProjectStatus::Cancelled => {}
            ProjectStatus::Completed => {
                return Err(EscrowError::invalid_state(
                    "project",
                    project_id,
                    "cancel",
                    "project is completed",
                ))
            }
            _ => {
                if let Some(busy) = milestones.iter().find(|m| m.status.is_underway()) {
                    return Err(EscrowError::invalid_state(
                        "project",
                        project_id,
                        "cancel",
                        format!("milestone {} is {}", busy.id, busy.status.as_str()),
                    ));
                }
                // Rewriting the unchanged milestones fails the claim if any moved meanwhile
                let mut batch = WriteBatch::new();
                let mut cancelled = project.clone();
                cancelled.status = ProjectStatus::Cancelled;
                batch = batch.update_project(cancelled);
                for milestone in &milestones {
                    batch = batch.update_milestone(milestone.clone());
                }
                self.store.apply(batch).await?;
                info!(project_id, "project cancelled");
            }
        }

        let mut first_failure = None;
        for milestone in &milestones {
            let held = matches!(
                self.store.active_payment(milestone.id).await?,
                Some(p) if p.status == PaymentStatus::Held
            );
            if !held {
                continue;
            }
            if let Err(err) = self.ledger.refund(milestone.id).await {
                warn!(project_id, milestone_id = milestone.id, error = %err, "refund on cancellation failed");
                first_failure.get_or_insert(err);
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }

        let project = views::load_project(self.store.as_ref(), project_id).await?;
        views::project_view(self.store.as_ref(), project, actor).await
    }
}
