//! Traits shared by the persisted escrow entities

use chrono::{DateTime, Utc};

/// Primary key of every stored row
pub type Id = i64;

pub trait Identifiable {
    fn id(&self) -> Id;
}

pub trait Timestamped {
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
}

/// Rows written by compare-and-set
///
/// A write carries the version it read; the store rejects it when the stored
/// version moved on, and bumps the version by one when it commits.
pub trait Lockable {
    fn lock_version(&self) -> i32;
}

/// Rows owned by a project (milestones)
pub trait ProjectScoped {
    fn project_id(&self) -> Id;
}

pub trait Entity: Identifiable + Timestamped + Send + Sync {
    /// Table the store keeps the entity in
    const TABLE_NAME: &'static str;

    /// Name used in error messages
    const TYPE_NAME: &'static str;
}
