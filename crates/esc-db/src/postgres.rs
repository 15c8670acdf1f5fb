//! PostgreSQL entity store
//!
//! Each batch runs in its own transaction. Compare-and-set updates match on
//! `id AND lock_version`; zero affected rows rolls the transaction back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use esc_core::traits::Id;
use esc_models::{
    EscrowPayment, Milestone, MilestoneReview, MilestoneStatus, NewEscrowPayment, NewMilestone,
    NewProject, NewUser, PaymentStatus, Project, ProjectStatus, User,
};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{StoreError, StoreResult};
use crate::pool::Database;
use crate::rows::{
    convert_all, MilestoneRow, PaymentRow, ProjectRow, ReviewRow, UserRow, MILESTONE_COLUMNS,
    PAYMENT_COLUMNS, PROJECT_COLUMNS, REVIEW_COLUMNS, USER_COLUMNS,
};
use crate::store::{EntityStore, ProjectFilter, Write, WriteBatch};

/// Turn unique and foreign key violations into store errors callers can act on
fn classify(err: sqlx::Error, conflict: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(conflict());
        }
    }
    StoreError::Database(err)
}

fn statuses(list: &[ProjectStatus]) -> Vec<String> {
    list.iter().map(|s| s.as_str().to_string()).collect()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Run the embedded migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("migrations applied");
        Ok(())
    }

    async fn apply_write(tx: &mut Transaction<'_, Postgres>, write: Write) -> StoreResult<()> {
        match write {
            Write::UpdateProject(project) => {
                let result = sqlx::query(
                    r#"
                    UPDATE projects
                    SET contractor_id = $1, invited_contractor_id = $2, title = $3,
                        description = $4, status = $5, start_date = $6, end_date = $7,
                        lock_version = lock_version + 1, updated_at = NOW()
                    WHERE id = $8 AND lock_version = $9
                    "#,
                )
                .bind(project.contractor_id)
                .bind(project.invited_contractor_id)
                .bind(&project.title)
                .bind(&project.description)
                .bind(project.status.as_str())
                .bind(project.start_date)
                .bind(project.end_date)
                .bind(project.id)
                .bind(project.lock_version)
                .execute(&mut **tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::stale("project", project.id, "was modified concurrently"));
                }
            }
            Write::UpdateMilestone(milestone) => {
                let result = sqlx::query(
                    r#"
                    UPDATE milestones
                    SET title = $1, description = $2, status = $3, due_date = $4,
                        lock_version = lock_version + 1, updated_at = NOW()
                    WHERE id = $5 AND lock_version = $6
                    "#,
                )
                .bind(&milestone.title)
                .bind(&milestone.description)
                .bind(milestone.status.as_str())
                .bind(milestone.due_date)
                .bind(milestone.id)
                .bind(milestone.lock_version)
                .execute(&mut **tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::stale("milestone", milestone.id, "was modified concurrently"));
                }
            }
            Write::UpdatePayment(payment) => {
                let result = sqlx::query(
                    r#"
                    UPDATE escrow_payments
                    SET status = $1, transaction_ref = $2, release_ref = $3, held_at = $4,
                        released_at = $5, refunded_at = $6, superseded_at = $7,
                        lock_version = lock_version + 1, updated_at = NOW()
                    WHERE id = $8 AND lock_version = $9
                    "#,
                )
                .bind(payment.status.as_str())
                .bind(&payment.transaction_ref)
                .bind(&payment.release_ref)
                .bind(payment.held_at)
                .bind(payment.released_at)
                .bind(payment.refunded_at)
                .bind(payment.superseded_at)
                .bind(payment.id)
                .bind(payment.lock_version)
                .execute(&mut **tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::stale("escrow payment", payment.id, "was modified concurrently"));
                }
            }
            Write::InsertReview(review) => {
                sqlx::query(
                    r#"
                    INSERT INTO milestone_reviews (milestone_id, reviewer_id, decision, notes)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(review.milestone_id)
                .bind(review.reviewer_id)
                .bind(review.decision.as_str())
                .bind(&review.notes)
                .execute(&mut **tx)
                .await?;
            }
            Write::PromoteProject { id, from, to } => {
                sqlx::query(
                    r#"
                    UPDATE projects
                    SET status = $1, lock_version = lock_version + 1, updated_at = NOW()
                    WHERE id = $2 AND status = ANY($3)
                    "#,
                )
                .bind(to.as_str())
                .bind(id)
                .bind(statuses(from))
                .execute(&mut **tx)
                .await?;
            }
            Write::GuardProjectStatus { id, allowed } => {
                let status = sqlx::query_scalar::<_, String>(
                    "SELECT status FROM projects WHERE id = $1 FOR SHARE",
                )
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or(StoreError::NotFound { entity: "project", id })?;
                if !allowed.iter().any(|s| s.as_str() == status) {
                    return Err(StoreError::stale("project", id, format!("project is {}", status)));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (email, role, first_name, last_name, phone, company_name, kvk_number)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.email)
            .bind(user.role.as_str())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.phone)
            .bind(&user.company_name)
            .bind(&user.kvk_number)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, || format!("email {} is already registered", user.email)))?;

        row.try_into()
    }

    async fn find_user(&self, id: Id) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE LOWER(email) = LOWER($1)", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn insert_project(
        &self,
        project: NewProject,
        milestones: Vec<NewMilestone>,
    ) -> StoreResult<(Project, Vec<Milestone>)> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO projects (customer_id, title, description, total_budget, status, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        );
        let row = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(project.customer_id)
            .bind(&project.title)
            .bind(&project.description)
            .bind(project.total_budget)
            .bind(ProjectStatus::Draft.as_str())
            .bind(project.start_date)
            .bind(project.end_date)
            .fetch_one(&mut *tx)
            .await?;
        let project = Project::try_from(row)?;

        let sql = format!(
            r#"
            INSERT INTO milestones (project_id, title, description, amount, sort_order, status, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            MILESTONE_COLUMNS
        );
        let mut created = Vec::with_capacity(milestones.len());
        for milestone in milestones {
            let row = sqlx::query_as::<_, MilestoneRow>(&sql)
                .bind(project.id)
                .bind(&milestone.title)
                .bind(&milestone.description)
                .bind(milestone.amount)
                .bind(milestone.order)
                .bind(MilestoneStatus::Pending.as_str())
                .bind(milestone.due_date)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| classify(e, || format!("milestone order {} is used twice", milestone.order)))?;
            created.push(Milestone::try_from(row)?);
        }
        created.sort_by_key(|m| (m.order, m.id));

        tx.commit().await?;
        tracing::debug!(project_id = project.id, milestones = created.len(), "project inserted");
        Ok((project, created))
    }

    async fn find_project(&self, id: Id) -> StoreResult<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = $1", PROJECT_COLUMNS);
        let row = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Project::try_from).transpose()
    }

    async fn list_projects(&self, filter: ProjectFilter) -> StoreResult<Vec<Project>> {
        let rows = match filter {
            ProjectFilter::All => {
                let sql = format!("SELECT {} FROM projects ORDER BY id", PROJECT_COLUMNS);
                sqlx::query_as::<_, ProjectRow>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
            ProjectFilter::Participant(user_id) => {
                let sql = format!(
                    "SELECT {} FROM projects WHERE customer_id = $1 OR contractor_id = $1 ORDER BY id",
                    PROJECT_COLUMNS
                );
                sqlx::query_as::<_, ProjectRow>(&sql)
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        convert_all(rows)
    }

    async fn find_milestone(&self, id: Id) -> StoreResult<Option<Milestone>> {
        let sql = format!("SELECT {} FROM milestones WHERE id = $1", MILESTONE_COLUMNS);
        let row = sqlx::query_as::<_, MilestoneRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Milestone::try_from).transpose()
    }

    async fn milestones_for_project(&self, project_id: Id) -> StoreResult<Vec<Milestone>> {
        let sql = format!(
            "SELECT {} FROM milestones WHERE project_id = $1 ORDER BY sort_order, id",
            MILESTONE_COLUMNS
        );
        let rows = sqlx::query_as::<_, MilestoneRow>(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn milestones_in_status(
        &self,
        status: MilestoneStatus,
        updated_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Milestone>> {
        let sql = format!(
            "SELECT {} FROM milestones WHERE status = $1 AND updated_at <= $2 ORDER BY id",
            MILESTONE_COLUMNS
        );
        let rows = sqlx::query_as::<_, MilestoneRow>(&sql)
            .bind(status.as_str())
            .bind(updated_before)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn active_payment(&self, milestone_id: Id) -> StoreResult<Option<EscrowPayment>> {
        let sql = format!(
            "SELECT {} FROM escrow_payments WHERE milestone_id = $1 AND superseded_at IS NULL",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(milestone_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(EscrowPayment::try_from).transpose()
    }

    async fn payments_for_milestone(&self, milestone_id: Id) -> StoreResult<Vec<EscrowPayment>> {
        let sql = format!(
            "SELECT {} FROM escrow_payments WHERE milestone_id = $1 ORDER BY id",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(milestone_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn insert_payment(&self, payment: NewEscrowPayment) -> StoreResult<EscrowPayment> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM escrow_payments WHERE milestone_id = $1 AND superseded_at IS NULL FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let active = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.milestone_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(EscrowPayment::try_from)
            .transpose()?;

        match active {
            None => {}
            Some(active) if active.status == PaymentStatus::Refunded => {
                sqlx::query(
                    r#"
                    UPDATE escrow_payments
                    SET superseded_at = NOW(), lock_version = lock_version + 1, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(active.id)
                .execute(&mut *tx)
                .await?;
            }
            Some(active) => {
                return Err(StoreError::Conflict(format!(
                    "milestone {} already has a {} payment",
                    payment.milestone_id,
                    active.status.as_str()
                )));
            }
        }

        let sql = format!(
            r#"
            INSERT INTO escrow_payments (milestone_id, amount, status, idempotency_key)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.milestone_id)
            .bind(payment.amount)
            .bind(PaymentStatus::Pending.as_str())
            .bind(&payment.idempotency_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                classify(e, || {
                    format!("milestone {} already has an active payment", payment.milestone_id)
                })
            })?;

        tx.commit().await?;
        row.try_into()
    }

    async fn discard_payment(&self, id: Id, lock_version: i32) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM escrow_payments WHERE id = $1 AND lock_version = $2 AND status = $3",
        )
        .bind(id)
        .bind(lock_version)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::stale(
                "escrow payment",
                id,
                "is no longer a pending reservation",
            ));
        }
        Ok(())
    }

    async fn pending_payments(&self, created_before: DateTime<Utc>) -> StoreResult<Vec<EscrowPayment>> {
        let sql = format!(
            "SELECT {} FROM escrow_payments WHERE status = $1 AND created_at <= $2 ORDER BY id",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(PaymentStatus::Pending.as_str())
            .bind(created_before)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn reviews_for_milestone(&self, milestone_id: Id) -> StoreResult<Vec<MilestoneReview>> {
        let sql = format!(
            "SELECT {} FROM milestone_reviews WHERE milestone_id = $1 ORDER BY id",
            REVIEW_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReviewRow>(&sql)
            .bind(milestone_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for write in batch.into_writes() {
            Self::apply_write(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
