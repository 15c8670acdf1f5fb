//! Read models returned to callers
//!
//! Views are filtered by the reading actor: the capture reference of a
//! payment identifies the customer's charge and is hidden from contractors.

use esc_auth::Actor;
use esc_core::error::EscrowError;
use esc_core::result::EscrowResult;
use esc_core::traits::Id;
use esc_db::EntityStore;
use esc_models::{EscrowPayment, Milestone, MilestoneReview, PaymentStatus, Project};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub id: Id,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub transaction_ref: Option<String>,
    pub release_ref: Option<String>,
    pub held_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl PaymentView {
    pub fn for_actor(payment: &EscrowPayment, actor: &Actor) -> Self {
        Self {
            id: payment.id,
            amount: payment.amount,
            status: payment.status,
            transaction_ref: if actor.is_contractor() {
                None
            } else {
                payment.transaction_ref.clone()
            },
            release_ref: payment.release_ref.clone(),
            held_at: payment.held_at,
            released_at: payment.released_at,
            refunded_at: payment.refunded_at,
        }
    }
}

/// A milestone inside a project view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneEntry {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub payment: Option<PaymentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    /// Ordered by milestone order
    pub milestones: Vec<MilestoneEntry>,
}

impl ProjectView {
    pub fn milestone(&self, id: Id) -> Option<&MilestoneEntry> {
        self.milestones.iter().find(|m| m.milestone.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneView {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub payment: Option<PaymentView>,
    pub reviews: Vec<MilestoneReview>,
}

pub(crate) async fn load_project(store: &dyn EntityStore, id: Id) -> EscrowResult<Project> {
    store
        .find_project(id)
        .await?
        .ok_or_else(|| EscrowError::not_found("project", id))
}

/// Load a milestone, treating one from another project as missing
pub(crate) async fn load_milestone(
    store: &dyn EntityStore,
    project_id: Id,
    milestone_id: Id,
) -> EscrowResult<Milestone> {
    store
        .find_milestone(milestone_id)
        .await?
        .filter(|m| m.project_id == project_id)
        .ok_or_else(|| EscrowError::not_found("milestone", milestone_id))
}

pub(crate) async fn project_view(
    store: &dyn EntityStore,
    project: Project,
    actor: &Actor,
) -> EscrowResult<ProjectView> {
    let mut milestones = Vec::new();
    for milestone in store.milestones_for_project(project.id).await? {
        let payment = store
            .active_payment(milestone.id)
            .await?
            .map(|p| PaymentView::for_actor(&p, actor));
        milestones.push(MilestoneEntry { milestone, payment });
    }
    Ok(ProjectView { project, milestones })
}

pub(crate) async fn milestone_view(
    store: &dyn EntityStore,
    milestone: Milestone,
    actor: &Actor,
) -> EscrowResult<MilestoneView> {
    let payment = store
        .active_payment(milestone.id)
        .await?
        .map(|p| PaymentView::for_actor(&p, actor));
    let reviews = store.reviews_for_milestone(milestone.id).await?;
    Ok(MilestoneView {
        milestone,
        payment,
        reviews,
    })
}
