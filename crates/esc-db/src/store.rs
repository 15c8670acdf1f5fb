//! Entity store abstraction
//!
//! Every mutation after creation goes through [`EntityStore::apply`], which
//! commits a [`WriteBatch`] all-or-nothing. Updates carry the `lock_version`
//! the caller read; the store rejects the whole batch with
//! [`StoreError::StaleWrite`](crate::StoreError::StaleWrite) when any row has
//! moved on since.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use esc_core::traits::Id;
use esc_models::{
    EscrowPayment, Milestone, MilestoneReview, MilestoneStatus, NewEscrowPayment, NewMilestone,
    NewMilestoneReview, NewProject, NewUser, Project, ProjectStatus, User,
};

use crate::error::StoreResult;

/// Which projects `list_projects` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectFilter {
    All,
    /// Projects the user owns or is assigned to
    Participant(Id),
}

/// A single write inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Replace the row if its stored `lock_version` still matches
    UpdateProject(Project),
    UpdateMilestone(Milestone),
    UpdatePayment(EscrowPayment),
    InsertReview(NewMilestoneReview),
    /// Move the project to `to` when its current status is one of `from`;
    /// otherwise leave it untouched
    PromoteProject {
        id: Id,
        from: &'static [ProjectStatus],
        to: ProjectStatus,
    },
    /// Fail the batch unless the project status is one of `allowed`
    GuardProjectStatus {
        id: Id,
        allowed: &'static [ProjectStatus],
    },
}

/// Writes committed together or not at all
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn update_project(mut self, project: Project) -> Self {
        self.writes.push(Write::UpdateProject(project));
        self
    }

    pub fn update_milestone(mut self, milestone: Milestone) -> Self {
        self.writes.push(Write::UpdateMilestone(milestone));
        self
    }

    pub fn update_payment(mut self, payment: EscrowPayment) -> Self {
        self.writes.push(Write::UpdatePayment(payment));
        self
    }

    pub fn insert_review(mut self, review: NewMilestoneReview) -> Self {
        self.writes.push(Write::InsertReview(review));
        self
    }

    pub fn promote_project(mut self, id: Id, from: &'static [ProjectStatus], to: ProjectStatus) -> Self {
        self.writes.push(Write::PromoteProject { id, from, to });
        self
    }

    pub fn guard_project_status(mut self, id: Id, allowed: &'static [ProjectStatus]) -> Self {
        self.writes.push(Write::GuardProjectStatus { id, allowed });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Persistence for users, projects, milestones, payments and reviews
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a user; `Conflict` when the email is taken
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;

    async fn find_user(&self, id: Id) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Insert a project together with its milestones in one transaction
    async fn insert_project(
        &self,
        project: NewProject,
        milestones: Vec<NewMilestone>,
    ) -> StoreResult<(Project, Vec<Milestone>)>;

    async fn find_project(&self, id: Id) -> StoreResult<Option<Project>>;

    async fn list_projects(&self, filter: ProjectFilter) -> StoreResult<Vec<Project>>;

    async fn find_milestone(&self, id: Id) -> StoreResult<Option<Milestone>>;

    /// Milestones of a project ordered by their `order`
    async fn milestones_for_project(&self, project_id: Id) -> StoreResult<Vec<Milestone>>;

    /// Milestones sitting in `status` since before `updated_before`
    async fn milestones_in_status(
        &self,
        status: MilestoneStatus,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Milestone>>;

    /// The non-superseded payment of a milestone, if any
    async fn active_payment(&self, milestone_id: Id) -> StoreResult<Option<EscrowPayment>>;

    /// Every payment of a milestone including superseded ones, oldest first
    async fn payments_for_milestone(&self, milestone_id: Id) -> StoreResult<Vec<EscrowPayment>>;

    /// Reserve a PENDING payment
    ///
    /// A REFUNDED active payment is superseded in the same step. Any other
    /// active payment makes this fail with `Conflict`.
    async fn insert_payment(&self, payment: NewEscrowPayment) -> StoreResult<EscrowPayment>;

    /// Delete a PENDING reservation whose capture did not go through
    async fn discard_payment(&self, id: Id, lock_version: i32) -> StoreResult<()>;

    /// PENDING reservations created before `created_before`
    async fn pending_payments(&self, created_before: DateTime<Utc>) -> StoreResult<Vec<EscrowPayment>>;

    /// Reviews of a milestone, oldest first
    async fn reviews_for_milestone(&self, milestone_id: Id) -> StoreResult<Vec<MilestoneReview>>;

    /// Commit a batch atomically
    async fn apply(&self, batch: WriteBatch) -> StoreResult<()>;
}
