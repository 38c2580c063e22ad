//! Storage layer - SQLite
//!
//! - `database`: connection pool management and initialization
//! - `migrations`: schema versioning and automatic migration
//!
//! ```ignore
//! use reqflow_core::storage::Database;
//!
//! let db = Database::in_memory().await?;
//! ```

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig, default_database_path};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
