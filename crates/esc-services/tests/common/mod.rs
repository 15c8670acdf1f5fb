#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use esc_auth::Actor;
use esc_contracts::projects::{CreateProjectParams, MilestoneParams};
use esc_contracts::users::RegisterUserParams;
use esc_core::traits::Id;
use esc_db::{EntityStore, MemoryStore, ProjectFilter, StoreError, StoreResult, Write, WriteBatch};
use esc_models::{
    EscrowPayment, Milestone, MilestoneReview, MilestoneStatus, NewEscrowPayment, NewMilestone,
    NewProject, NewUser, PaymentStatus, Project, User,
};
use esc_payments::SandboxRail;
use esc_services::{EscrowServices, ProjectView};
use parking_lot::Mutex;
use rust_decimal::Decimal;

/// Services over an in-memory store and sandbox rail, with one customer
/// and one contractor registered
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub rail: Arc<SandboxRail>,
    pub services: EscrowServices,
    pub customer: Actor,
    pub contractor: Actor,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::wired(store.clone(), store).await
    }

    /// Services committing through a [`FlakyStore`] over the harness store
    pub async fn flaky() -> (Self, Arc<FlakyStore>) {
        let store = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        (Self::wired(store, flaky.clone()).await, flaky)
    }

    async fn wired(store: Arc<MemoryStore>, services_store: Arc<dyn EntityStore>) -> Self {
        let rail = Arc::new(SandboxRail::new());
        let services = EscrowServices::new(services_store, rail.clone());

        let customer = services
            .users
            .register_user(RegisterUserParams::customer("klant@example.nl", "Klaas", "Klant"))
            .await
            .unwrap();
        let contractor = services
            .users
            .register_user(RegisterUserParams::contractor(
                "bouw@example.nl",
                "Bert",
                "Bouwer",
                "Bouwer BV",
                "12345678",
            ))
            .await
            .unwrap();

        Self {
            store,
            rail,
            services,
            customer: Actor::from(&customer),
            contractor: Actor::from(&contractor),
        }
    }

    /// Create a project with one milestone per amount, in order
    pub async fn draft(&self, amounts: &[i64]) -> ProjectView {
        let milestones = amounts
            .iter()
            .enumerate()
            .map(|(order, amount)| {
                MilestoneParams::new(format!("Phase {}", order + 1), Decimal::new(*amount, 0), order as i32)
            })
            .collect();
        self.services
            .projects
            .create_project(&self.customer, CreateProjectParams::new("Bathroom", milestones))
            .await
            .unwrap()
    }

    /// Create a project and assign the contractor to it
    pub async fn assigned(&self, amounts: &[i64]) -> ProjectView {
        let project_id = self.draft(amounts).await.project.id;
        self.services
            .projects
            .invite_contractor(project_id, &self.customer, self.contractor.user_id)
            .await
            .unwrap();
        self.services
            .projects
            .accept_invitation(project_id, &self.contractor)
            .await
            .unwrap()
    }

    /// Fund, start and submit a milestone
    pub async fn submitted(&self, project_id: Id, milestone_id: Id) {
        let workflow = &self.services.workflow;
        workflow.fund(project_id, milestone_id, &self.customer).await.unwrap();
        workflow.start(project_id, milestone_id, &self.contractor).await.unwrap();
        workflow.submit(project_id, milestone_id, &self.contractor).await.unwrap();
    }

    pub async fn project(&self, id: Id) -> Project {
        self.store.find_project(id).await.unwrap().unwrap()
    }

    pub async fn milestone(&self, id: Id) -> Milestone {
        self.store.find_milestone(id).await.unwrap().unwrap()
    }

    pub async fn payment(&self, milestone_id: Id) -> Option<EscrowPayment> {
        self.store.active_payment(milestone_id).await.unwrap()
    }

    pub async fn store_reviews(&self, milestone_id: Id) -> Vec<MilestoneReview> {
        self.store.reviews_for_milestone(milestone_id).await.unwrap()
    }
}

/// Milestone ids of a view, in order
pub fn milestone_ids(view: &ProjectView) -> Vec<Id> {
    view.milestones.iter().map(|m| m.milestone.id).collect()
}

/// Memory store that can fail commits, as a dropped database connection would
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing_payment_statuses: Mutex<Vec<PaymentStatus>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_payment_statuses: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next batch that writes a payment in `status`, once per call
    pub fn fail_next_payment_commit(&self, status: PaymentStatus) {
        self.failing_payment_statuses.lock().push(status);
    }

    fn should_fail(&self, writes: &[Write]) -> bool {
        let mut armed = self.failing_payment_statuses.lock();
        let hit = armed.iter().position(|status| {
            writes
                .iter()
                .any(|w| matches!(w, Write::UpdatePayment(p) if p.status == *status))
        });
        match hit {
            Some(index) => {
                armed.remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        self.inner.insert_user(user).await
    }

    async fn find_user(&self, id: Id) -> StoreResult<Option<User>> {
        self.inner.find_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.find_user_by_email(email).await
    }

    async fn insert_project(
        &self,
        project: NewProject,
        milestones: Vec<NewMilestone>,
    ) -> StoreResult<(Project, Vec<Milestone>)> {
        self.inner.insert_project(project, milestones).await
    }

    async fn find_project(&self, id: Id) -> StoreResult<Option<Project>> {
        self.inner.find_project(id).await
    }

    async fn list_projects(&self, filter: ProjectFilter) -> StoreResult<Vec<Project>> {
        self.inner.list_projects(filter).await
    }

    async fn find_milestone(&self, id: Id) -> StoreResult<Option<Milestone>> {
        self.inner.find_milestone(id).await
    }

    async fn milestones_for_project(&self, project_id: Id) -> StoreResult<Vec<Milestone>> {
        self.inner.milestones_for_project(project_id).await
    }

    async fn milestones_in_status(
        &self,
        status: MilestoneStatus,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Milestone>> {
        self.inner.milestones_in_status(status, updated_before).await
    }

    async fn active_payment(&self, milestone_id: Id) -> StoreResult<Option<EscrowPayment>> {
        self.inner.active_payment(milestone_id).await
    }

    async fn payments_for_milestone(&self, milestone_id: Id) -> StoreResult<Vec<EscrowPayment>> {
        self.inner.payments_for_milestone(milestone_id).await
    }

    async fn insert_payment(&self, payment: NewEscrowPayment) -> StoreResult<EscrowPayment> {
        self.inner.insert_payment(payment).await
    }

    async fn discard_payment(&self, id: Id, lock_version: i32) -> StoreResult<()> {
        self.inner.discard_payment(id, lock_version).await
    }

    async fn pending_payments(&self, created_before: DateTime<Utc>) -> StoreResult<Vec<EscrowPayment>> {
        self.inner.pending_payments(created_before).await
    }

    async fn reviews_for_milestone(&self, milestone_id: Id) -> StoreResult<Vec<MilestoneReview>> {
        self.inner.reviews_for_milestone(milestone_id).await
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let writes = batch.into_writes();
        if self.should_fail(&writes) {
            return Err(StoreError::Conflict("connection reset during commit".to_string()));
        }
        let mut batch = WriteBatch::new();
        for write in writes {
            batch.push(write);
        }
        self.inner.apply(batch).await
    }
}
