//! # esc-contracts
//!
//! Contract validation for Escrow RS.
//!
//! Contracts validate caller input before services touch the store, and hold
//! the pure preconditions of the milestone state machine. Nothing in this
//! crate performs I/O.

pub mod base;
pub mod milestones;
pub mod projects;
pub mod users;

pub use base::*;
