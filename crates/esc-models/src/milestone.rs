//! Milestone model
//!
//! Table: milestones

use chrono::{DateTime, NaiveDate, Utc};
use esc_core::traits::{Entity, Id, Identifiable, Lockable, ProjectScoped, Timestamped};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

/// Work status of a milestone
///
/// Funding is not a work status: a funded milestone stays `Pending` until the
/// contractor starts it, and the held escrow payment records the funding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    InProgress,
    Submitted,
    Approved,
    Rejected,
    Paid,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
        }
    }

    /// Contractor is working on it or waiting on the customer
    pub fn is_underway(&self) -> bool {
        matches!(
            self,
            Self::InProgress | Self::Submitted | Self::Approved | Self::Rejected
        )
    }
}

impl FromStr for MilestoneStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "submitted" => Ok(Self::Submitted),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "paid" => Ok(Self::Paid),
            other => Err(ParseEnumError::new("milestone status", other)),
        }
    }
}

/// Edges of the milestone state machine
///
/// ```text
/// PENDING -start-> IN_PROGRESS -submit-> SUBMITTED -approve-> APPROVED -settle-> PAID
///                       ^                    |                    |
///                       +------reject--------+                    |
///                                   SUBMITTED <--revert_approval--+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneTransition {
    Start,
    Submit,
    /// Claims the milestone for payout before the rail transfer
    Approve,
    /// Records the payout once the transfer succeeded
    Settle,
    /// Undoes an approval claim after a failed transfer
    RevertApproval,
    Reject,
}

impl MilestoneTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Settle => "settle",
            Self::RevertApproval => "revert_approval",
            Self::Reject => "reject",
        }
    }

    /// Status the milestone must be in for this transition
    pub fn from_status(&self) -> MilestoneStatus {
        match self {
            Self::Start => MilestoneStatus::Pending,
            Self::Submit => MilestoneStatus::InProgress,
            Self::Approve | Self::Reject => MilestoneStatus::Submitted,
            Self::Settle | Self::RevertApproval => MilestoneStatus::Approved,
        }
    }

    /// Status the milestone ends up in
    pub fn to_status(&self) -> MilestoneStatus {
        match self {
            Self::Start | Self::Reject => MilestoneStatus::InProgress,
            Self::Submit | Self::RevertApproval => MilestoneStatus::Submitted,
            Self::Approve => MilestoneStatus::Approved,
            Self::Settle => MilestoneStatus::Paid,
        }
    }
}

impl MilestoneStatus {
    /// Resulting status, or `None` when the transition is not legal from here
    pub fn apply(&self, transition: MilestoneTransition) -> Option<MilestoneStatus> {
        (transition.from_status() == *self).then(|| transition.to_status())
    }
}

/// Milestone entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: Id,
    pub project_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,

    /// Presentation order, unique within the project
    pub order: i32,

    pub status: MilestoneStatus,
    pub due_date: Option<NaiveDate>,

    pub lock_version: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identifiable for Milestone {
    fn id(&self) -> Id {
        self.id
    }
}

impl Timestamped for Milestone {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Lockable for Milestone {
    fn lock_version(&self) -> i32 {
        self.lock_version
    }
}

impl ProjectScoped for Milestone {
    fn project_id(&self) -> Id {
        self.project_id
    }
}

impl Entity for Milestone {
    const TABLE_NAME: &'static str = "milestones";
    const TYPE_NAME: &'static str = "milestone";
}

/// Input for inserting a milestone; status starts at `Pending`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMilestone {
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub order: i32,
    pub due_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let status = MilestoneStatus::Pending;
        let status = status.apply(MilestoneTransition::Start).unwrap();
        assert_eq!(status, MilestoneStatus::InProgress);
        let status = status.apply(MilestoneTransition::Submit).unwrap();
        assert_eq!(status, MilestoneStatus::Submitted);
        let status = status.apply(MilestoneTransition::Approve).unwrap();
        assert_eq!(status, MilestoneStatus::Approved);
        let status = status.apply(MilestoneTransition::Settle).unwrap();
        assert_eq!(status, MilestoneStatus::Paid);
    }

    #[test]
    fn test_rejection_returns_to_work() {
        assert_eq!(
            MilestoneStatus::Submitted.apply(MilestoneTransition::Reject),
            Some(MilestoneStatus::InProgress)
        );
        assert_eq!(
            MilestoneStatus::Approved.apply(MilestoneTransition::RevertApproval),
            Some(MilestoneStatus::Submitted)
        );
    }

    #[test]
    fn test_illegal_transitions() {
        assert_eq!(MilestoneStatus::Pending.apply(MilestoneTransition::Submit), None);
        assert_eq!(MilestoneStatus::InProgress.apply(MilestoneTransition::Approve), None);
        assert_eq!(MilestoneStatus::Paid.apply(MilestoneTransition::Approve), None);
        assert_eq!(MilestoneStatus::Paid.apply(MilestoneTransition::Reject), None);
        assert_eq!(MilestoneStatus::Submitted.apply(MilestoneTransition::Start), None);
    }
}
