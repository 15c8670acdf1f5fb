//! User registration contract

use std::sync::LazyLock;

use esc_core::error::ValidationErrors;
use esc_models::user::normalize_email;
use esc_models::{NewUser, UserRole};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::base::{is_blank, merge_validator_errors, Contract, ValidationResult};

/// KVK (Dutch Chamber of Commerce) numbers are exactly eight digits
static KVK_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{8}$").unwrap());

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{5,19}$").unwrap());

/// Input for `register_user`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserParams {
    #[validate(email(message = "is not a valid email address"))]
    pub email: String,

    pub role: UserRole,

    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 255, message = "must be between 1 and 255 characters"))]
    pub last_name: String,

    pub phone: Option<String>,

    #[validate(length(max = 255, message = "is too long (maximum is 255 characters)"))]
    pub company_name: Option<String>,

    pub kvk_number: Option<String>,
}

impl RegisterUserParams {
    pub fn customer(email: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            role: UserRole::Customer,
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            company_name: None,
            kvk_number: None,
        }
    }

    pub fn contractor(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        company_name: impl Into<String>,
        kvk_number: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            role: UserRole::Contractor,
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            company_name: Some(company_name.into()),
            kvk_number: Some(kvk_number.into()),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn into_new_user(self) -> NewUser {
        NewUser {
            email: normalize_email(&self.email),
            role: self.role,
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            phone: self.phone.map(|p| p.trim().to_string()),
            company_name: self.company_name.map(|c| c.trim().to_string()),
            kvk_number: self.kvk_number.map(|k| k.trim().to_string()),
        }
    }
}

/// Contract for self-service registration
///
/// Admin accounts are provisioned by operators, never self-registered.
#[derive(Debug, Default)]
pub struct RegisterUserContract;

impl RegisterUserContract {
    pub fn new() -> Self {
        Self
    }

    fn validate_role_fields(&self, params: &RegisterUserParams, errors: &mut ValidationErrors) {
        match params.role {
            UserRole::Admin => errors.add("role", "cannot be self-registered"),
            UserRole::Contractor => {
                match params.company_name.as_deref() {
                    Some(name) if !is_blank(name) => {}
                    _ => errors.add("company_name", "is required for contractors"),
                }
                match params.kvk_number.as_deref().map(str::trim) {
                    Some(kvk) if KVK_PATTERN.is_match(kvk) => {}
                    Some(_) => errors.add("kvk_number", "must be exactly 8 digits"),
                    None => errors.add("kvk_number", "is required for contractors"),
                }
            }
            UserRole::Customer => {
                if params.kvk_number.is_some() {
                    errors.add("kvk_number", "is only allowed for contractors");
                }
            }
        }
    }
}

impl Contract<RegisterUserParams> for RegisterUserContract {
    fn validate(&self, params: &RegisterUserParams) -> ValidationResult {
        let mut errors = ValidationErrors::new();

        let mut normalized = params.clone();
        normalized.email = normalize_email(&params.email);
        if let Err(source) = normalized.validate() {
            merge_validator_errors(&mut errors, "", &source);
        }

        if is_blank(&params.first_name) && !errors.has_error("first_name") {
            errors.add("first_name", "can't be blank");
        }
        if is_blank(&params.last_name) && !errors.has_error("last_name") {
            errors.add("last_name", "can't be blank");
        }
        if let Some(phone) = params.phone.as_deref() {
            if !PHONE_PATTERN.is_match(phone.trim()) {
                errors.add("phone", "is not a valid phone number");
            }
        }

        self.validate_role_fields(params, &mut errors);

        errors.into_result()
    }
}
