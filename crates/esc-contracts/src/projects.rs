//! Project creation contract
//!
//! The total budget is always derived from the milestone amounts. A caller
//! may still send the total it expects; a mismatch is a validation error
//! rather than a silent correction.

use std::collections::HashSet;

use chrono::NaiveDate;
use esc_core::error::ValidationErrors;
use esc_core::traits::Id;
use esc_models::{NewMilestone, NewProject};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::base::{is_blank, merge_validator_errors, Contract, ValidationResult};

/// Money is kept to whole cents
const MAX_AMOUNT_SCALE: u32 = 2;

/// One milestone of a new project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneParams {
    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub title: String,

    #[validate(length(max = 10000, message = "is too long (maximum is 10000 characters)"))]
    pub description: Option<String>,

    pub amount: Decimal,

    pub order: i32,

    pub due_date: Option<NaiveDate>,
}

impl MilestoneParams {
    pub fn new(title: impl Into<String>, amount: Decimal, order: i32) -> Self {
        Self {
            title: title.into(),
            description: None,
            amount,
            order,
            due_date: None,
        }
    }
}

/// Input for `create_project`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectParams {
    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub title: String,

    #[validate(length(max = 10000, message = "is too long (maximum is 10000 characters)"))]
    pub description: Option<String>,

    #[validate]
    pub milestones: Vec<MilestoneParams>,

    /// Optional client-side total, checked against the derived sum
    pub total_budget: Option<Decimal>,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl CreateProjectParams {
    pub fn new(title: impl Into<String>, milestones: Vec<MilestoneParams>) -> Self {
        Self {
            title: title.into(),
            description: None,
            milestones,
            total_budget: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_total_budget(mut self, total: Decimal) -> Self {
        self.total_budget = Some(total);
        self
    }

    pub fn with_dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Sum of the milestone amounts
    pub fn derived_budget(&self) -> Decimal {
        self.milestones.iter().map(|m| m.amount).sum()
    }

    /// Split validated params into the rows the store inserts
    pub fn into_new_project(self, customer_id: Id) -> (NewProject, Vec<NewMilestone>) {
        let total_budget = self.derived_budget();
        let project = NewProject {
            customer_id,
            title: self.title.trim().to_string(),
            description: self.description,
            total_budget,
            start_date: self.start_date,
            end_date: self.end_date,
        };
        let milestones = self
            .milestones
            .into_iter()
            .map(|m| NewMilestone {
                title: m.title.trim().to_string(),
                description: m.description,
                amount: m.amount,
                order: m.order,
                due_date: m.due_date,
            })
            .collect();
        (project, milestones)
    }
}

/// Contract for creating a new project with its milestones
#[derive(Debug, Default)]
pub struct CreateProjectContract;

impl CreateProjectContract {
    pub fn new() -> Self {
        Self
    }

    fn validate_milestones(&self, params: &CreateProjectParams, errors: &mut ValidationErrors) {
        if params.milestones.is_empty() {
            errors.add("milestones", "can't be empty");
            return;
        }

        let mut seen_orders = HashSet::new();
        for (index, milestone) in params.milestones.iter().enumerate() {
            let field = |name: &str| format!("milestones[{}].{}", index, name);

            if is_blank(&milestone.title) {
                errors.add(field("title"), "can't be blank");
            }
            if milestone.amount <= Decimal::ZERO {
                errors.add(field("amount"), "must be greater than 0");
            } else if milestone.amount.normalize().scale() > MAX_AMOUNT_SCALE {
                errors.add(field("amount"), "must not have more than 2 decimal places");
            }
            if milestone.order < 0 {
                errors.add(field("order"), "must be 0 or greater");
            }
            if !seen_orders.insert(milestone.order) {
                errors.add(field("order"), "is already used by another milestone");
            }
        }
    }

    fn validate_budget(&self, params: &CreateProjectParams, errors: &mut ValidationErrors) {
        if let Some(expected) = params.total_budget {
            let derived = params.derived_budget();
            if expected != derived {
                errors.add(
                    "total_budget",
                    format!("must equal the sum of milestone amounts ({})", derived),
                );
            }
        }
    }

    fn validate_dates(&self, params: &CreateProjectParams, errors: &mut ValidationErrors) {
        if let (Some(start), Some(end)) = (params.start_date, params.end_date) {
            if end < start {
                errors.add("end_date", "must be on or after the start date");
            }
        }
        if let Some(end) = params.end_date {
            for (index, milestone) in params.milestones.iter().enumerate() {
                if matches!(milestone.due_date, Some(due) if due > end) {
                    errors.add(
                        format!("milestones[{}].due_date", index),
                        "must not be after the project end date",
                    );
                }
            }
        }
    }
}

impl Contract<CreateProjectParams> for CreateProjectContract {
    fn validate(&self, params: &CreateProjectParams) -> ValidationResult {
        let mut errors = ValidationErrors::new();

        if let Err(source) = params.validate() {
            merge_validator_errors(&mut errors, "", &source);
        }
        if is_blank(&params.title) && !errors.has_error("title") {
            errors.add("title", "can't be blank");
        }

        self.validate_milestones(params, &mut errors);
        self.validate_budget(params, &mut errors);
        self.validate_dates(params, &mut errors);

        errors.into_result()
    }
}
