use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{
    repaired_category, Attributes, BatchOffset, FieldChange, Outcome, RecordId, RunMode,
};

pub const DEFAULT_SAMPLE_CAP: usize = 20;
pub const MAX_SAMPLE_CAP: usize = 100;
pub const DEFAULT_CHANGE_CAP: usize = 100;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub job: String,
    pub dataset: String,
    pub mode: RunMode,
    pub engine_version: String,
    pub started_at: String,
    pub finished_at: String,
}

/// Counts per outcome category. Serializes flat, e.g.
/// `{"total":3,"already_correct":1,"merged":0,"unmatched":1,"error":0,"repaired_via_fallback_author":1}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub already_correct: usize,
    pub merged: usize,
    pub unmatched: usize,
    #[serde(rename = "error")]
    pub errors: usize,
    /// Keyed by `repaired_via_<strategy>`.
    #[serde(flatten)]
    pub repaired: BTreeMap<String, usize>,
}

impl BatchSummary {
    /// Repairs attributed to one strategy, by strategy name.
    pub fn repaired_via(&self, strategy: &str) -> usize {
        self.repaired
            .get(&repaired_category(strategy))
            .copied()
            .unwrap_or(0)
    }

    pub fn repaired_total(&self) -> usize {
        self.repaired.values().sum()
    }

    /// Every category with its count, zero-valued base categories included.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = self.repaired.clone();
        counts.insert("already_correct".into(), self.already_correct);
        counts.insert("merged".into(), self.merged);
        counts.insert("unmatched".into(), self.unmatched);
        counts.insert("error".into(), self.errors);
        counts
    }

    /// `already_correct + Σ repaired + merged + unmatched + error == total`.
    pub fn is_conserved(&self) -> bool {
        self.already_correct + self.repaired_total() + self.merged + self.unmatched + self.errors
            == self.total
    }

    /// Fold another summary into this one (multi-batch totals).
    pub fn absorb(&mut self, other: &BatchSummary) {
        self.total += other.total;
        self.already_correct += other.already_correct;
        self.merged += other.merged;
        self.unmatched += other.unmatched;
        self.errors += other.errors;
        for (category, n) in &other.repaired {
            *self.repaired.entry(category.clone()).or_insert(0) += n;
        }
    }

    fn count(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::AlreadyCorrect => self.already_correct += 1,
            Outcome::Repaired { .. } => *self.repaired.entry(outcome.category()).or_insert(0) += 1,
            Outcome::Merged { .. } => self.merged += 1,
            Outcome::Unmatched => self.unmatched += 1,
            Outcome::Error { .. } => self.errors += 1,
        }
    }
}

/// An unmatched or failed candidate kept verbatim for review.
#[derive(Debug, Clone, Serialize)]
pub struct SampleEntry {
    pub id: RecordId,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub attributes: Attributes,
}

/// A write that was made (or, in preview, would be made).
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEntry {
    pub id: RecordId,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<RecordId>,
    pub fields: BTreeMap<String, FieldChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub meta: ReportMeta,
    pub summary: BatchSummary,
    pub samples: Vec<SampleEntry>,
    pub changes: Vec<ChangeEntry>,
    pub offset: BatchOffset,
    pub next_offset: BatchOffset,
    pub done: bool,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Accumulates one run's outcomes. Consumed by [`finalize`](Self::finalize).
#[derive(Debug)]
pub struct ReportBuilder {
    job: String,
    dataset: String,
    mode: RunMode,
    offset: BatchOffset,
    started_at: String,
    sample_cap: usize,
    change_cap: usize,
    summary: BatchSummary,
    samples: Vec<SampleEntry>,
    changes: Vec<ChangeEntry>,
}

impl ReportBuilder {
    pub fn new(job: &str, dataset: &str, mode: RunMode, offset: BatchOffset) -> Self {
        Self {
            job: job.to_string(),
            dataset: dataset.to_string(),
            mode,
            offset,
            started_at: chrono::Utc::now().to_rfc3339(),
            sample_cap: DEFAULT_SAMPLE_CAP,
            change_cap: DEFAULT_CHANGE_CAP,
            summary: BatchSummary::default(),
            samples: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Sample cap is clamped to `1..=MAX_SAMPLE_CAP`.
    pub fn with_caps(mut self, sample_cap: usize, change_cap: usize) -> Self {
        self.sample_cap = sample_cap.clamp(1, MAX_SAMPLE_CAP);
        self.change_cap = change_cap;
        self
    }

    /// Called exactly once per processed candidate.
    pub fn record(&mut self, id: RecordId, outcome: &Outcome, attributes: &Attributes) {
        self.summary.count(outcome);

        match outcome {
            Outcome::Unmatched | Outcome::Error { .. } => {
                if self.samples.len() < self.sample_cap {
                    let reason = match outcome {
                        Outcome::Error { reason } => Some(reason.clone()),
                        _ => None,
                    };
                    self.samples.push(SampleEntry {
                        id,
                        category: outcome.category(),
                        reason,
                        attributes: attributes.clone(),
                    });
                }
            }
            Outcome::Repaired { changes, .. } => self.push_change(id, outcome, None, changes),
            Outcome::Merged { into, changes } => self.push_change(id, outcome, Some(*into), changes),
            Outcome::AlreadyCorrect => {}
        }
    }

    fn push_change(
        &mut self,
        id: RecordId,
        outcome: &Outcome,
        merged_into: Option<RecordId>,
        fields: &BTreeMap<String, FieldChange>,
    ) {
        if self.changes.len() < self.change_cap {
            self.changes.push(ChangeEntry {
                id,
                category: outcome.category(),
                merged_into,
                fields: fields.clone(),
            });
        }
    }

    pub fn summary(&self) -> &BatchSummary {
        &self.summary
    }

    pub fn finalize(self, next_offset: BatchOffset, done: bool, cancelled: bool) -> BatchReport {
        BatchReport {
            meta: ReportMeta {
                job: self.job,
                dataset: self.dataset,
                mode: self.mode,
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                started_at: self.started_at,
                finished_at: chrono::Utc::now().to_rfc3339(),
            },
            summary: self.summary,
            samples: self.samples,
            changes: self.changes,
            offset: self.offset,
            next_offset,
            done,
            cancelled,
        }
    }
}
