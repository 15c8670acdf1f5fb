//! # esc-db
//!
//! Entity store for Escrow RS.
//!
//! This crate provides:
//!
//! - The [`EntityStore`] trait and its atomic [`WriteBatch`]
//! - [`MemoryStore`] for tests and local demos
//! - [`PgStore`], a PostgreSQL implementation using SQLx, with embedded migrations
//! - Connection pool management
//!
//! ## Example
//!
//! ```ignore
//! use esc_db::{Database, EntityStore, PgStore};
//!
//! let db = Database::connect(&config.database).await?;
//! let store = PgStore::new(&db);
//! store.migrate().await?;
//! let project = store.find_project(1).await?;
//! ```

pub mod error;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod rows;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pool::{Database, PoolStats};
pub use postgres::PgStore;
pub use store::{EntityStore, ProjectFilter, Write, WriteBatch};
