//! Core error types for Escrow RS
//!
//! Every operation exposed by the services layer fails with one of the
//! [`EscrowError`] kinds below. Field-level input problems are collected in
//! [`ValidationErrors`] by the contracts layer and surface as
//! [`EscrowError::Validation`].

use std::collections::BTreeMap;
use thiserror::Error;

use crate::traits::Id;

/// Core error type for all escrow operations
#[derive(Error, Debug, Clone)]
pub enum EscrowError {
    #[error("Not found: {entity} with id={id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: cannot {action}: {message}")]
    Forbidden {
        action: &'static str,
        message: String,
    },

    #[error("Invalid state: {entity} {id} cannot {transition}: {message}")]
    InvalidState {
        entity: &'static str,
        id: Id,
        transition: &'static str,
        message: String,
    },

    #[error("Milestone {milestone_id} has no held escrow payment")]
    NotFunded { milestone_id: Id },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Payment capture failed for milestone {milestone_id}: {message}")]
    PaymentCaptureFailed { milestone_id: Id, message: String },

    #[error("Payment release failed for milestone {milestone_id}: {message}")]
    PaymentReleaseFailed { milestone_id: Id, message: String },

    #[error("Payment refund failed for milestone {milestone_id}: {message}")]
    PaymentRefundFailed { milestone_id: Id, message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EscrowError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EscrowError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(action: &'static str, message: impl Into<String>) -> Self {
        EscrowError::Forbidden {
            action,
            message: message.into(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: Id,
        transition: &'static str,
        message: impl Into<String>,
    ) -> Self {
        EscrowError::InvalidState {
            entity,
            id,
            transition,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        EscrowError::Conflict {
            message: message.into(),
        }
    }

    /// Build a validation error with a single field message
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        EscrowError::Validation(errors)
    }

    /// HTTP-style status code for callers that expose the core over a transport
    pub fn status_code(&self) -> u16 {
        match self {
            EscrowError::NotFound { .. } => 404,
            EscrowError::Forbidden { .. } => 403,
            EscrowError::InvalidState { .. } | EscrowError::NotFunded { .. } => 409,
            EscrowError::Conflict { .. } => 409,
            EscrowError::Validation(_) => 422,
            EscrowError::PaymentCaptureFailed { .. }
            | EscrowError::PaymentReleaseFailed { .. }
            | EscrowError::PaymentRefundFailed { .. } => 502,
            EscrowError::Database(_) | EscrowError::Config(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EscrowError::NotFound { .. } => "not_found",
            EscrowError::Forbidden { .. } => "forbidden",
            EscrowError::InvalidState { .. } => "invalid_state",
            EscrowError::NotFunded { .. } => "not_funded",
            EscrowError::Validation(_) => "validation_failed",
            EscrowError::PaymentCaptureFailed { .. } => "payment_capture_failed",
            EscrowError::PaymentReleaseFailed { .. } => "payment_release_failed",
            EscrowError::PaymentRefundFailed { .. } => "payment_refund_failed",
            EscrowError::Conflict { .. } => "conflict",
            EscrowError::Database(_) => "database_error",
            EscrowError::Config(_) => "configuration_error",
        }
    }

    /// Whether the caller may retry the same call unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EscrowError::PaymentCaptureFailed { .. }
                | EscrowError::PaymentReleaseFailed { .. }
                | EscrowError::PaymentRefundFailed { .. }
                | EscrowError::Database(_)
        )
    }
}

/// Validation errors collection
#[derive(Error, Debug, Default, Clone, PartialEq, Eq)]
#[error("{}", self.full_messages().join(", "))]
pub struct ValidationErrors {
    /// Field-specific errors: field_name -> Vec<error_messages>
    pub errors: BTreeMap<String, Vec<String>>,
    /// Base errors not tied to a specific field
    pub base_errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_base(&mut self, message: impl Into<String>) {
        self.base_errors.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.base_errors.is_empty()
    }

    /// Check if there are errors for a specific field
    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Vec<String>> {
        self.errors.get(field)
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
        self.base_errors.extend(other.base_errors);
    }

    pub fn full_messages(&self) -> Vec<String> {
        let mut messages = self.base_errors.clone();
        for (field, field_messages) in &self.errors {
            for msg in field_messages {
                messages.push(format!("{} {}", field, msg));
            }
        }
        messages
    }

    /// `Ok(())` when empty, otherwise the collected errors
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}
