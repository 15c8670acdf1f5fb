//! # esc-core
//!
//! Core types, traits, and utilities for Escrow RS.
//!
//! This crate provides the foundational building blocks used across all other crates:
//! - The error taxonomy shared by the store, ledger and workflow layers
//! - Result type aliases
//! - Core traits (Identifiable, Timestamped, Lockable)
//! - Configuration types

pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use error::*;
pub use result::*;
pub use traits::*;
