//! SQLite persistence layer for the Stockrelay daemon.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Database migrations
//! - Model types for movements and unmapped SKUs
//! - Query helpers implementing the queue semantics (claim, complete,
//!   schedule retry, fail, manual retry)
//! - The [`MovementStore`] facade used by the dispatcher and IPC handlers
//!
//! # Architecture
//!
//! The `AsyncDatabase` uses a single dedicated thread for all SQLite
//! operations. Queries are sent through a channel and executed in FIFO
//! order.
//!
//! ```ignore
//! let store = MovementStore::open(&paths.database_file()).await?;
//! let claimed = store.claim_due("store-1", 25, lease).await?;
//! ```
//!
//! **Important**: Only SQL operations run inside `db.call()`. Platform
//! pushes and other slow work happen outside.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
pub use store::MovementStore;
