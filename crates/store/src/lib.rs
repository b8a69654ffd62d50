//! `mendkit-store` — SQLite persistence for mendkit.
//!
//! Implements the reconciler's store capabilities over a single SQLite file,
//! plus the run-once migration state and an audit log table.

pub mod audit_log;
pub mod error;
pub mod sqlite;
mod state;

pub use audit_log::SqliteAuditLog;
pub use error::SqliteStoreError;
pub use sqlite::{DatasetInfo, SqliteStore};
