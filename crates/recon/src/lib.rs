//! `mendkit-recon` — Idempotent batch reconciliation engine.
//!
//! Pure engine crate: enumerates records from a [`Store`], resolves each one
//! through an ordered strategy chain, writes only what differs, collapses
//! duplicates, and returns a [`BatchReport`]. No CLI or database dependencies.

pub mod audit;
pub mod config;
pub mod driver;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod job;
pub mod memory;
pub mod merge;
pub mod model;
pub mod mutate;
pub mod normalize;
pub mod report;
pub mod resolve;
pub mod store;
pub mod strategies;

pub use audit::{AuditEvent, AuditSink, MemoryAudit, TracingAudit};
pub use config::JobConfig;
pub use driver::{advance, run_to_completion, DriveSummary, MigrationState};
pub use engine::{CancelFlag, Reconciler};
pub use error::{ReconError, StoreError};
pub use job::Job;
pub use memory::MemoryStore;
pub use model::{AttrValue, BatchOffset, Candidate, CanonicalValue, ChangeSet, RecordId, RunMode};
pub use report::{BatchReport, BatchSummary};
pub use resolve::{ResolutionStrategy, StrategyChain};
pub use store::{Capabilities, Store, StoreRead};
