//! Database row mappings
//!
//! Status columns are stored as their lowercase `as_str` form; an unknown
//! value surfaces as a decode error.

use chrono::{DateTime, NaiveDate, Utc};
use esc_models::{
    EscrowPayment, Milestone, MilestoneReview, Project, User,
};
use rust_decimal::Decimal;
use sqlx::FromRow;

use crate::error::StoreError;

fn decode<T>(value: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

pub(crate) const USER_COLUMNS: &str = "id, email, role, first_name, last_name, phone, \
     company_name, kvk_number, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub kvk_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            role: decode(&row.role)?,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            company_name: row.company_name,
            kvk_number: row.kvk_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) const PROJECT_COLUMNS: &str = "id, customer_id, contractor_id, invited_contractor_id, \
     title, description, total_budget, status, start_date, end_date, lock_version, \
     created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub customer_id: i64,
    pub contractor_id: Option<i64>,
    pub invited_contractor_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub total_budget: Decimal,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub lock_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = StoreError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id,
            customer_id: row.customer_id,
            contractor_id: row.contractor_id,
            invited_contractor_id: row.invited_contractor_id,
            title: row.title,
            description: row.description,
            total_budget: row.total_budget,
            status: decode(&row.status)?,
            start_date: row.start_date,
            end_date: row.end_date,
            lock_version: row.lock_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) const MILESTONE_COLUMNS: &str = "id, project_id, title, description, amount, \
     sort_order, status, due_date, lock_version, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct MilestoneRow {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub sort_order: i32,
    pub status: String,
    pub due_date: Option<NaiveDate>,
    pub lock_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MilestoneRow> for Milestone {
    type Error = StoreError;

    fn try_from(row: MilestoneRow) -> Result<Self, Self::Error> {
        Ok(Milestone {
            id: row.id,
            project_id: row.project_id,
            title: row.title,
            description: row.description,
            amount: row.amount,
            order: row.sort_order,
            status: decode(&row.status)?,
            due_date: row.due_date,
            lock_version: row.lock_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) const PAYMENT_COLUMNS: &str = "id, milestone_id, amount, status, idempotency_key, \
     transaction_ref, release_ref, held_at, released_at, refunded_at, superseded_at, \
     lock_version, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: i64,
    pub milestone_id: i64,
    pub amount: Decimal,
    pub status: String,
    pub idempotency_key: String,
    pub transaction_ref: Option<String>,
    pub release_ref: Option<String>,
    pub held_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub lock_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for EscrowPayment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(EscrowPayment {
            id: row.id,
            milestone_id: row.milestone_id,
            amount: row.amount,
            status: decode(&row.status)?,
            idempotency_key: row.idempotency_key,
            transaction_ref: row.transaction_ref,
            release_ref: row.release_ref,
            held_at: row.held_at,
            released_at: row.released_at,
            refunded_at: row.refunded_at,
            superseded_at: row.superseded_at,
            lock_version: row.lock_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) const REVIEW_COLUMNS: &str = "id, milestone_id, reviewer_id, decision, notes, created_at";

#[derive(Debug, Clone, FromRow)]
pub struct ReviewRow {
    pub id: i64,
    pub milestone_id: i64,
    pub reviewer_id: i64,
    pub decision: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ReviewRow> for MilestoneReview {
    type Error = StoreError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(MilestoneReview {
            id: row.id,
            milestone_id: row.milestone_id,
            reviewer_id: row.reviewer_id,
            decision: decode(&row.decision)?,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

/// Convert a list of rows, failing on the first undecodable one
pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use esc_models::{MilestoneStatus, ProjectStatus};

    #[test]
    fn test_project_row_decodes_status() {
        let now = Utc::now();
        let row = ProjectRow {
            id: 1,
            customer_id: 2,
            contractor_id: None,
            invited_contractor_id: None,
            title: "Garden".to_string(),
            description: None,
            total_budget: Decimal::new(150_000, 2),
            status: "pending_contractor".to_string(),
            start_date: None,
            end_date: None,
            lock_version: 3,
            created_at: now,
            updated_at: now,
        };
        let project = Project::try_from(row).unwrap();
        assert_eq!(project.status, ProjectStatus::PendingContractor);
        assert_eq!(project.lock_version, 3);
    }

    #[test]
    fn test_unknown_status_is_decode_error() {
        let now = Utc::now();
        let row = MilestoneRow {
            id: 1,
            project_id: 1,
            title: "Walls".to_string(),
            description: None,
            amount: Decimal::new(100, 0),
            sort_order: 0,
            status: "funded".to_string(),
            due_date: None,
            lock_version: 0,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(
            Milestone::try_from(row),
            Err(StoreError::Database(sqlx::Error::Decode(_)))
        ));
        assert_eq!(MilestoneStatus::InProgress.as_str(), "in_progress");
    }
}
