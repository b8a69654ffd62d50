//! Run-once bookkeeping across batches.
//!
//! A migration is driven batch by batch; the persisted [`MigrationState`]
//! records where the next batch starts and whether the work already finished,
//! so a completed migration is never repeated.

use serde::{Deserialize, Serialize};

use crate::audit::AuditSink;
use crate::engine::Reconciler;
use crate::error::ReconError;
use crate::model::BatchOffset;
use crate::report::{BatchReport, BatchSummary};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    #[default]
    NotStarted,
    InProgress { offset: BatchOffset },
    Completed,
}

impl MigrationState {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Where the next batch would start; `None` once completed.
    pub fn next_offset(&self) -> Option<BatchOffset> {
        match self {
            Self::NotStarted => Some(BatchOffset::start()),
            Self::InProgress { offset } => Some(*offset),
            Self::Completed => None,
        }
    }

    fn after(report: &BatchReport) -> Self {
        if report.done {
            Self::Completed
        } else {
            Self::InProgress {
                offset: report.next_offset,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Advance {
    pub state: MigrationState,
    /// `None` when the migration had already completed.
    pub report: Option<BatchReport>,
}

/// Run the next batch, if any. A completed state runs nothing and comes back
/// unchanged.
pub fn advance<S: Store, A: AuditSink>(
    rec: &mut Reconciler<S, A>,
    state: &MigrationState,
    batch_size: usize,
) -> Result<Advance, ReconError> {
    let Some(offset) = state.next_offset() else {
        tracing::info!(job = %rec.job().name, "migration already completed; nothing to do");
        return Ok(Advance {
            state: *state,
            report: None,
        });
    };

    let report = rec.run_batch(offset, batch_size)?;
    Ok(Advance {
        state: MigrationState::after(&report),
        report: Some(report),
    })
}

#[derive(Debug, Clone, Default)]
pub struct DriveSummary {
    pub state: MigrationState,
    pub batches: usize,
    pub totals: BatchSummary,
    pub cancelled: bool,
}

/// Keep advancing until completed, cancelled or `max_batches` have run.
///
/// `on_batch` sees every batch report together with the state it leads to, so
/// callers can persist progress as they go.
pub fn run_to_completion<S, A, F>(
    rec: &mut Reconciler<S, A>,
    mut state: MigrationState,
    batch_size: usize,
    max_batches: Option<usize>,
    mut on_batch: F,
) -> Result<DriveSummary, ReconError>
where
    S: Store,
    A: AuditSink,
    F: FnMut(&BatchReport, &MigrationState) -> Result<(), ReconError>,
{
    let mut summary = DriveSummary {
        state,
        ..DriveSummary::default()
    };

    while !state.is_completed() && max_batches.map_or(true, |max| summary.batches < max) {
        let step = advance(rec, &state, batch_size)?;
        let Some(report) = step.report else { break };

        state = step.state;
        summary.batches += 1;
        summary.totals.absorb(&report.summary);
        on_batch(&report, &state)?;

        if report.cancelled {
            summary.cancelled = true;
            break;
        }
    }

    summary.state = state;
    Ok(summary)
}
