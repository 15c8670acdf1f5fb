//! In-memory entity store
//!
//! Backs tests and the CLI demo. A single `RwLock` over all tables makes every
//! batch atomic; ids come from one shared sequence. Foreign-key lookups go
//! through secondary indexes kept next to the tables.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use esc_core::traits::{Entity, Id, Lockable};
use esc_models::{
    EscrowPayment, Milestone, MilestoneReview, MilestoneStatus, NewEscrowPayment, NewMilestone,
    NewProject, NewUser, PaymentStatus, Project, ProjectStatus, User,
};
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{EntityStore, ProjectFilter, Write, WriteBatch};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<Id, User>,
    projects: BTreeMap<Id, Project>,
    milestones: BTreeMap<Id, Milestone>,
    payments: BTreeMap<Id, EscrowPayment>,
    reviews: BTreeMap<Id, MilestoneReview>,

    /// lowercased email -> user
    user_emails: HashMap<String, Id>,
    /// idempotency key -> payment
    payment_keys: HashMap<String, Id>,
    /// Child ids in insertion order, which is id order
    project_milestones: HashMap<Id, Vec<Id>>,
    milestone_payments: HashMap<Id, Vec<Id>>,
    milestone_reviews: HashMap<Id, Vec<Id>>,
}

/// Rows of `table` listed under `parent` in `index`
fn children<'a, T>(
    index: &'a HashMap<Id, Vec<Id>>,
    table: &'a BTreeMap<Id, T>,
    parent: Id,
) -> impl Iterator<Item = &'a T> + 'a {
    index
        .get(&parent)
        .into_iter()
        .flatten()
        .filter_map(move |id| table.get(id))
}

impl Tables {
    fn payments_of(&self, milestone_id: Id) -> impl Iterator<Item = &EscrowPayment> + '_ {
        children(&self.milestone_payments, &self.payments, milestone_id)
    }

    fn active_payment(&self, milestone_id: Id) -> Option<&EscrowPayment> {
        self.payments_of(milestone_id).find(|p| p.is_active())
    }
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> Id {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Look an id up in the batch's staged rows first, then in the committed table
fn current<'a, T>(staged: &'a HashMap<Id, T>, stored: &'a BTreeMap<Id, T>, id: Id) -> Option<&'a T> {
    staged.get(&id).or_else(|| stored.get(&id))
}

fn check_version<T: Entity + Lockable>(stored: &T, expected: i32) -> StoreResult<()> {
    if stored.lock_version() != expected {
        return Err(StoreError::stale(
            T::TYPE_NAME,
            stored.id(),
            format!(
                "was modified concurrently (version {} != {})",
                stored.lock_version(),
                expected
            ),
        ));
    }
    Ok(())
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.write();
        let email = user.email.to_lowercase();
        if tables.user_emails.contains_key(&email) {
            return Err(StoreError::Conflict(format!("email {} is already registered", user.email)));
        }

        let now = Utc::now();
        let user = User {
            id: self.next_id(),
            email: user.email,
            role: user.role,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            company_name: user.company_name,
            kvk_number: user.kvk_number,
            created_at: now,
            updated_at: now,
        };
        tables.user_emails.insert(email, user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Id) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read();
        Ok(tables
            .user_emails
            .get(&email.to_lowercase())
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn insert_project(
        &self,
        project: NewProject,
        milestones: Vec<NewMilestone>,
    ) -> StoreResult<(Project, Vec<Milestone>)> {
        let mut tables = self.tables.write();
        if !tables.users.contains_key(&project.customer_id) {
            return Err(StoreError::NotFound {
                entity: "user",
                id: project.customer_id,
            });
        }
        let mut orders = HashSet::new();
        if let Some(duplicate) = milestones.iter().find(|m| !orders.insert(m.order)) {
            return Err(StoreError::Conflict(format!(
                "milestone order {} is used more than once",
                duplicate.order
            )));
        }

        let now = Utc::now();
        let project = Project {
            id: self.next_id(),
            customer_id: project.customer_id,
            contractor_id: None,
            invited_contractor_id: None,
            title: project.title,
            description: project.description,
            total_budget: project.total_budget,
            status: ProjectStatus::Draft,
            start_date: project.start_date,
            end_date: project.end_date,
            lock_version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut created: Vec<Milestone> = milestones
            .into_iter()
            .map(|m| Milestone {
                id: self.next_id(),
                project_id: project.id,
                title: m.title,
                description: m.description,
                amount: m.amount,
                order: m.order,
                status: MilestoneStatus::Pending,
                due_date: m.due_date,
                lock_version: 0,
                created_at: now,
                updated_at: now,
            })
            .collect();
        created.sort_by_key(|m| (m.order, m.id));

        tables.projects.insert(project.id, project.clone());
        let mut ids: Vec<Id> = created.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        tables.project_milestones.insert(project.id, ids);
        for milestone in &created {
            tables.milestones.insert(milestone.id, milestone.clone());
        }
        Ok((project, created))
    }

    async fn find_project(&self, id: Id) -> StoreResult<Option<Project>> {
        Ok(self.tables.read().projects.get(&id).cloned())
    }

    async fn list_projects(&self, filter: ProjectFilter) -> StoreResult<Vec<Project>> {
        let tables = self.tables.read();
        let projects = tables
            .projects
            .values()
            .filter(|p| match filter {
                ProjectFilter::All => true,
                ProjectFilter::Participant(user_id) => p.is_participant(user_id),
            })
            .cloned()
            .collect();
        Ok(projects)
    }

    async fn find_milestone(&self, id: Id) -> StoreResult<Option<Milestone>> {
        Ok(self.tables.read().milestones.get(&id).cloned())
    }

    async fn milestones_for_project(&self, project_id: Id) -> StoreResult<Vec<Milestone>> {
        let tables = self.tables.read();
        let mut milestones: Vec<Milestone> =
            children(&tables.project_milestones, &tables.milestones, project_id)
                .cloned()
                .collect();
        milestones.sort_by_key(|m| (m.order, m.id));
        Ok(milestones)
    }

    async fn milestones_in_status(
        &self,
        status: MilestoneStatus,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Milestone>> {
        let tables = self.tables.read();
        Ok(tables
            .milestones
            .values()
            .filter(|m| m.status == status && m.updated_at <= updated_before)
            .cloned()
            .collect())
    }

    async fn active_payment(&self, milestone_id: Id) -> StoreResult<Option<EscrowPayment>> {
        Ok(self.tables.read().active_payment(milestone_id).cloned())
    }

    async fn payments_for_milestone(&self, milestone_id: Id) -> StoreResult<Vec<EscrowPayment>> {
        Ok(self.tables.read().payments_of(milestone_id).cloned().collect())
    }

    async fn insert_payment(&self, payment: NewEscrowPayment) -> StoreResult<EscrowPayment> {
        let mut tables = self.tables.write();
        if !tables.milestones.contains_key(&payment.milestone_id) {
            return Err(StoreError::NotFound {
                entity: "milestone",
                id: payment.milestone_id,
            });
        }
        if tables.payment_keys.contains_key(&payment.idempotency_key) {
            return Err(StoreError::Conflict(format!(
                "idempotency key {} is already used",
                payment.idempotency_key
            )));
        }

        let now = Utc::now();
        let superseded = match tables.active_payment(payment.milestone_id) {
            None => None,
            Some(active) if active.status == PaymentStatus::Refunded => Some(active.id),
            Some(active) => {
                return Err(StoreError::Conflict(format!(
                    "milestone {} already has a {} payment",
                    payment.milestone_id,
                    active.status.as_str()
                )))
            }
        };
        if let Some(old) = superseded.and_then(|id| tables.payments.get_mut(&id)) {
            old.superseded_at = Some(now);
            old.lock_version += 1;
            old.updated_at = now;
        }

        let payment = EscrowPayment {
            id: self.next_id(),
            milestone_id: payment.milestone_id,
            amount: payment.amount,
            status: PaymentStatus::Pending,
            idempotency_key: payment.idempotency_key,
            transaction_ref: None,
            release_ref: None,
            held_at: None,
            released_at: None,
            refunded_at: None,
            superseded_at: None,
            lock_version: 0,
            created_at: now,
            updated_at: now,
        };
        tables
            .payment_keys
            .insert(payment.idempotency_key.clone(), payment.id);
        tables
            .milestone_payments
            .entry(payment.milestone_id)
            .or_default()
            .push(payment.id);
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn discard_payment(&self, id: Id, lock_version: i32) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let payment = tables
            .payments
            .get(&id)
            .ok_or(StoreError::NotFound { entity: "escrow payment", id })?;
        check_version(payment, lock_version)?;
        if payment.status != PaymentStatus::Pending {
            return Err(StoreError::stale(
                "escrow payment",
                id,
                format!("is {}, only pending reservations can be discarded", payment.status.as_str()),
            ));
        }
        if let Some(removed) = tables.payments.remove(&id) {
            tables.payment_keys.remove(&removed.idempotency_key);
            if let Some(ids) = tables.milestone_payments.get_mut(&removed.milestone_id) {
                ids.retain(|p| *p != id);
            }
        }
        Ok(())
    }

    async fn pending_payments(&self, created_before: DateTime<Utc>) -> StoreResult<Vec<EscrowPayment>> {
        let tables = self.tables.read();
        Ok(tables
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at <= created_before)
            .cloned()
            .collect())
    }

    async fn reviews_for_milestone(&self, milestone_id: Id) -> StoreResult<Vec<MilestoneReview>> {
        let tables = self.tables.read();
        Ok(children(&tables.milestone_reviews, &tables.reviews, milestone_id)
            .cloned()
            .collect())
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let now = Utc::now();

        let mut projects: HashMap<Id, Project> = HashMap::new();
        let mut milestones: HashMap<Id, Milestone> = HashMap::new();
        let mut payments: HashMap<Id, EscrowPayment> = HashMap::new();
        let mut reviews = Vec::new();

        for write in batch.into_writes() {
            match write {
                Write::UpdateProject(mut project) => {
                    let stored = current(&projects, &tables.projects, project.id)
                        .ok_or(StoreError::NotFound { entity: "project", id: project.id })?;
                    check_version(stored, project.lock_version)?;
                    project.lock_version += 1;
                    project.updated_at = now;
                    projects.insert(project.id, project);
                }
                Write::UpdateMilestone(mut milestone) => {
                    let stored = current(&milestones, &tables.milestones, milestone.id)
                        .ok_or(StoreError::NotFound { entity: "milestone", id: milestone.id })?;
                    check_version(stored, milestone.lock_version)?;
                    milestone.lock_version += 1;
                    milestone.updated_at = now;
                    milestones.insert(milestone.id, milestone);
                }
                Write::UpdatePayment(mut payment) => {
                    let stored = current(&payments, &tables.payments, payment.id)
                        .ok_or(StoreError::NotFound { entity: "escrow payment", id: payment.id })?;
                    check_version(stored, payment.lock_version)?;
                    payment.lock_version += 1;
                    payment.updated_at = now;
                    payments.insert(payment.id, payment);
                }
                Write::InsertReview(review) => {
                    if current(&milestones, &tables.milestones, review.milestone_id).is_none() {
                        return Err(StoreError::NotFound {
                            entity: "milestone",
                            id: review.milestone_id,
                        });
                    }
                    reviews.push(review);
                }
                Write::PromoteProject { id, from, to } => {
                    let stored = current(&projects, &tables.projects, id)
                        .ok_or(StoreError::NotFound { entity: "project", id })?;
                    if from.contains(&stored.status) {
                        let mut project = stored.clone();
                        project.status = to;
                        project.lock_version += 1;
                        project.updated_at = now;
                        projects.insert(id, project);
                    }
                }
                Write::GuardProjectStatus { id, allowed } => {
                    let stored = current(&projects, &tables.projects, id)
                        .ok_or(StoreError::NotFound { entity: "project", id })?;
                    if !allowed.contains(&stored.status) {
                        return Err(StoreError::stale(
                            "project",
                            id,
                            format!("project is {}", stored.status.as_str()),
                        ));
                    }
                }
            }
        }

        tables.projects.extend(projects);
        tables.milestones.extend(milestones);
        tables.payments.extend(payments);
        for review in reviews {
            let id = self.next_id();
            tables
                .milestone_reviews
                .entry(review.milestone_id)
                .or_default()
                .push(id);
            tables.reviews.insert(
                id,
                MilestoneReview {
                    id,
                    milestone_id: review.milestone_id,
                    reviewer_id: review.reviewer_id,
                    decision: review.decision,
                    notes: review.notes,
                    created_at: now,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esc_models::{NewMilestoneReview, ReviewDecision, UserRole};
    use rust_decimal::Decimal;

    fn new_user(email: &str, role: UserRole) -> NewUser {
        NewUser {
            email: email.to_string(),
            role,
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            phone: None,
            company_name: None,
            kvk_number: None,
        }
    }

    fn new_milestone(title: &str, amount: i64, order: i32) -> NewMilestone {
        NewMilestone {
            title: title.to_string(),
            description: None,
            amount: Decimal::new(amount, 0),
            order,
            due_date: None,
        }
    }

    async fn seeded() -> (MemoryStore, Project, Vec<Milestone>) {
        let store = MemoryStore::new();
        let customer = store
            .insert_user(new_user("customer@example.nl", UserRole::Customer))
            .await
            .unwrap();
        let (project, milestones) = store
            .insert_project(
                NewProject {
                    customer_id: customer.id,
                    title: "Bathroom".to_string(),
                    description: None,
                    total_budget: Decimal::new(1500, 0),
                    start_date: None,
                    end_date: None,
                },
                vec![new_milestone("Second", 500, 1), new_milestone("First", 1000, 0)],
            )
            .await
            .unwrap();
        (store, project, milestones)
    }

    fn reservation(milestone_id: Id, key: &str) -> NewEscrowPayment {
        NewEscrowPayment {
            milestone_id,
            amount: Decimal::new(1000, 0),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store
            .insert_user(new_user("a@example.nl", UserRole::Customer))
            .await
            .unwrap();
        let result = store
            .insert_user(new_user("A@example.nl", UserRole::Contractor))
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_duplicate_milestone_order_conflicts() {
        let (store, project, _) = seeded().await;
        let result = store
            .insert_project(
                NewProject {
                    customer_id: project.customer_id,
                    title: "Garage".to_string(),
                    description: None,
                    total_budget: Decimal::new(800, 0),
                    start_date: None,
                    end_date: None,
                },
                vec![new_milestone("Roof", 400, 0), new_milestone("Walls", 400, 0)],
            )
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.list_projects(ProjectFilter::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_milestones_come_back_ordered() {
        let (store, project, created) = seeded().await;
        assert_eq!(created[0].title, "First");
        let milestones = store.milestones_for_project(project.id).await.unwrap();
        let orders: Vec<i32> = milestones.iter().map(|m| m.order).collect();
        assert_eq!(orders, vec![0, 1]);
        assert!(milestones.iter().all(|m| m.status == MilestoneStatus::Pending));
    }

    #[tokio::test]
    async fn test_stale_milestone_write_rejects_whole_batch() {
        let (store, project, milestones) = seeded().await;
        let mut first = milestones[0].clone();
        first.status = MilestoneStatus::InProgress;
        store
            .apply(WriteBatch::new().update_milestone(first.clone()))
            .await
            .unwrap();

        // Same snapshot again, plus a project promotion that must not land
        let result = store
            .apply(
                WriteBatch::new()
                    .promote_project(project.id, &[ProjectStatus::Draft], ProjectStatus::Active)
                    .update_milestone(first),
            )
            .await;
        assert!(matches!(result, Err(StoreError::StaleWrite { .. })));
        let stored = store.find_project(project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Draft);
        assert_eq!(stored.lock_version, 0);
    }

    #[tokio::test]
    async fn test_promote_is_conditional_and_guard_fails_batch() {
        let (store, project, _) = seeded().await;
        store
            .apply(WriteBatch::new().promote_project(
                project.id,
                &[ProjectStatus::Active],
                ProjectStatus::InProgress,
            ))
            .await
            .unwrap();
        let stored = store.find_project(project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Draft);

        let result = store
            .apply(WriteBatch::new().guard_project_status(project.id, ProjectStatus::WORKABLE))
            .await;
        assert!(result.unwrap_err().is_stale());
    }

    #[tokio::test]
    async fn test_single_active_payment_per_milestone() {
        let (store, _, milestones) = seeded().await;
        let milestone_id = milestones[0].id;

        let first = store.insert_payment(reservation(milestone_id, "ms-1")).await.unwrap();
        assert_eq!(first.status, PaymentStatus::Pending);
        let second = store.insert_payment(reservation(milestone_id, "ms-2")).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));

        // Refunded payments are superseded by a new reservation
        let mut refunded = first.clone();
        refunded.status = PaymentStatus::Refunded;
        store
            .apply(WriteBatch::new().update_payment(refunded))
            .await
            .unwrap();
        let next = store.insert_payment(reservation(milestone_id, "ms-2")).await.unwrap();

        let active = store.active_payment(milestone_id).await.unwrap().unwrap();
        assert_eq!(active.id, next.id);
        let history = store.payments_for_milestone(milestone_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].superseded_at.is_some());
    }

    #[tokio::test]
    async fn test_discard_only_pending_reservations() {
        let (store, _, milestones) = seeded().await;
        let payment = store
            .insert_payment(reservation(milestones[0].id, "ms-1"))
            .await
            .unwrap();
        assert_eq!(store.pending_payments(Utc::now()).await.unwrap().len(), 1);

        assert!(store.discard_payment(payment.id, 7).await.unwrap_err().is_stale());
        store.discard_payment(payment.id, payment.lock_version).await.unwrap();
        assert!(store.active_payment(milestones[0].id).await.unwrap().is_none());
        assert!(store.payments_for_milestone(milestones[0].id).await.unwrap().is_empty());

        // The key is free again once the reservation is gone
        store
            .insert_payment(reservation(milestones[0].id, "ms-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reviews_are_recorded_with_batch() {
        let (store, _, milestones) = seeded().await;
        store
            .apply(WriteBatch::new().insert_review(NewMilestoneReview {
                milestone_id: milestones[0].id,
                reviewer_id: 1,
                decision: ReviewDecision::Rejected,
                notes: Some("incomplete".to_string()),
            }))
            .await
            .unwrap();
        let reviews = store.reviews_for_milestone(milestones[0].id).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].decision, ReviewDecision::Rejected);
    }

    #[tokio::test]
    async fn test_participant_filter() {
        let (store, project, _) = seeded().await;
        assert_eq!(
            store
                .list_projects(ProjectFilter::Participant(project.customer_id))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .list_projects(ProjectFilter::Participant(999))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.list_projects(ProjectFilter::All).await.unwrap().len(), 1);
    }
}
