//! User registration and lookup

use std::sync::Arc;

use esc_auth::Actor;
use esc_contracts::users::{RegisterUserContract, RegisterUserParams};
use esc_contracts::Contract;
use esc_core::error::EscrowError;
use esc_core::result::EscrowResult;
use esc_core::traits::Id;
use esc_db::EntityStore;
use esc_models::User;
use tracing::{info, instrument};

pub struct UserService {
    store: Arc<dyn EntityStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Register a customer or contractor
    ///
    /// Emails are compared after trimming and lowercasing.
    #[instrument(skip(self, params), fields(role = params.role.as_str()))]
    pub async fn register_user(&self, params: RegisterUserParams) -> EscrowResult<User> {
        RegisterUserContract::new().validate(&params)?;

        let new_user = params.into_new_user();
        if self.store.find_user_by_email(&new_user.email).await?.is_some() {
            return Err(EscrowError::conflict(format!(
                "email {} is already registered",
                new_user.email
            )));
        }

        // The store's unique index still catches a concurrent registration
        let user = self.store.insert_user(new_user).await?;
        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Users read their own record; admins read any
    #[instrument(skip(self))]
    pub async fn get_user(&self, actor: &Actor, id: Id) -> EscrowResult<User> {
        if actor.user_id != id && !actor.is_admin() {
            return Err(EscrowError::forbidden("view user", "users may only read their own record"));
        }
        self.store
            .find_user(id)
            .await?
            .ok_or_else(|| EscrowError::not_found("user", id))
    }
}
