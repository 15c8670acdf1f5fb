//! Milestone review model
//!
//! Table: milestone_reviews. One row per approval or rejection decision.

use chrono::{DateTime, Utc};
use esc_core::traits::Id;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for ReviewDecision {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ParseEnumError::new("review decision", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneReview {
    pub id: Id,
    pub milestone_id: Id,
    pub reviewer_id: Id,
    pub decision: ReviewDecision,
    /// Optional approval notes, or the mandatory rejection reason
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMilestoneReview {
    pub milestone_id: Id,
    pub reviewer_id: Id,
    pub decision: ReviewDecision,
    pub notes: Option<String>,
}
