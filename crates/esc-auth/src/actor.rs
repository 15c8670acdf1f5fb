//! The authenticated caller

use esc_core::traits::Id;
use esc_models::{User, UserRole};
use serde::{Deserialize, Serialize};

/// Authenticated identity performing an operation
///
/// Supplied by the identity provider and never re-derived by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: Id,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: Id, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: Id) -> Self {
        Self::new(user_id, UserRole::Customer)
    }

    pub fn contractor(user_id: Id) -> Self {
        Self::new(user_id, UserRole::Contractor)
    }

    pub fn admin(user_id: Id) -> Self {
        Self::new(user_id, UserRole::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_customer(&self) -> bool {
        self.role == UserRole::Customer
    }

    pub fn is_contractor(&self) -> bool {
        self.role == UserRole::Contractor
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self::new(user.id, user.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert!(Actor::customer(1).is_customer());
        assert!(Actor::contractor(2).is_contractor());
        let admin = Actor::admin(3);
        assert!(admin.is_admin());
        assert_eq!(admin.user_id, 3);
    }
}
