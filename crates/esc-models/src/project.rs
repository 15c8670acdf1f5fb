//! Project model
//!
//! Table: projects

use chrono::{DateTime, NaiveDate, Utc};
use esc_core::traits::{Entity, Id, Identifiable, Lockable, Timestamped};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

/// Project lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    #[default]
    Draft,
    PendingContractor,
    Active,
    InProgress,
    Completed,
    Cancelled,
    /// Reserved for dispute handling; no transition currently leads here
    Disputed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingContractor => "pending_contractor",
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }

    /// No further workflow transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Statuses in which milestones may still be funded
    pub const FUNDABLE: &'static [ProjectStatus] = &[
        ProjectStatus::Draft,
        ProjectStatus::PendingContractor,
        ProjectStatus::Active,
        ProjectStatus::InProgress,
    ];

    /// Statuses in which contractors may work on milestones
    pub const WORKABLE: &'static [ProjectStatus] =
        &[ProjectStatus::Active, ProjectStatus::InProgress];
}

impl FromStr for ProjectStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending_contractor" => Ok(Self::PendingContractor),
            "active" => Ok(Self::Active),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "disputed" => Ok(Self::Disputed),
            other => Err(ParseEnumError::new("project status", other)),
        }
    }
}

/// Project entity
///
/// Owned by the customer who created it. The contractor is a referenced
/// collaborator, set once an invited contractor accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Id,

    /// Owning customer, immutable
    pub customer_id: Id,

    /// Assigned contractor
    pub contractor_id: Option<Id>,

    /// Contractor invited but not yet accepted
    pub invited_contractor_id: Option<Id>,

    pub title: String,
    pub description: Option<String>,

    /// Sum of milestone amounts at creation
    pub total_budget: Decimal,

    pub status: ProjectStatus,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    pub lock_version: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_customer(&self, user_id: Id) -> bool {
        self.customer_id == user_id
    }

    pub fn is_contractor(&self, user_id: Id) -> bool {
        self.contractor_id == Some(user_id)
    }

    pub fn is_participant(&self, user_id: Id) -> bool {
        self.is_customer(user_id) || self.is_contractor(user_id)
    }
}

impl Identifiable for Project {
    fn id(&self) -> Id {
        self.id
    }
}

impl Timestamped for Project {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Lockable for Project {
    fn lock_version(&self) -> i32 {
        self.lock_version
    }
}

impl Entity for Project {
    const TABLE_NAME: &'static str = "projects";
    const TYPE_NAME: &'static str = "project";
}

/// Input for inserting a project; status starts at `Draft`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub customer_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub total_budget: Decimal,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}
