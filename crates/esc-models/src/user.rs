//! User model
//!
//! Table: users

use chrono::{DateTime, Utc};
use esc_core::traits::{Entity, Id, Identifiable, Timestamped};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

/// Marketplace role; fixed at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Customer,
    Contractor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Contractor => "contractor",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "contractor" => Ok(Self::Contractor),
            "admin" => Ok(Self::Admin),
            other => Err(ParseEnumError::new("user role", other)),
        }
    }
}

/// User entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,

    /// Normalized (trimmed, lowercase) email address, unique
    pub email: String,

    pub role: UserRole,

    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,

    /// Contractors only
    pub company_name: Option<String>,

    /// Dutch Chamber of Commerce registration number, contractors only
    pub kvk_number: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

impl Identifiable for User {
    fn id(&self) -> Id {
        self.id
    }
}

impl Timestamped for User {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Entity for User {
    const TABLE_NAME: &'static str = "users";
    const TYPE_NAME: &'static str = "user";
}

/// Input for inserting a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub kvk_number: Option<String>,
}

/// Canonical form used for uniqueness checks
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
