//! # esc-auth
//!
//! Authorization for Escrow RS.
//!
//! The identity provider is external: callers hand in an [`Actor`] (user id
//! and role) on every operation. The [`guard`] decides whether that actor may
//! perform an [`Action`] on a project, based on role, ownership and
//! assignment.

pub mod actor;
pub mod guard;

pub use actor::Actor;
pub use guard::{authorize, Action, ProjectAccess};
