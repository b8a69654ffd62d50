use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditSink, TracingAudit};
use crate::enumerate::enumerate;
use crate::error::ReconError;
use crate::job::Job;
use crate::merge::{self, MergeKey, MergeSpec};
use crate::model::{Attributes, BatchOffset, Candidate, Outcome, RecordId, RunMode};
use crate::mutate::{self, Mutation};
use crate::report::{BatchReport, ReportBuilder};
use crate::resolve::Resolution;
use crate::store::{Capabilities, Store, StoreRead};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Checked between candidates; a candidate in progress always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Runs a [`Job`] against a store, one bounded batch per call.
pub struct Reconciler<S, A = TracingAudit> {
    store: S,
    job: Job,
    audit: A,
    cancel: Option<CancelFlag>,
}

impl<S: Store, A: AuditSink> Reconciler<S, A> {
    /// Fails if the job has no strategies or needs a capability the store
    /// does not offer.
    pub fn new(store: S, job: Job, audit: A) -> Result<Self, ReconError> {
        if job.chain.is_empty() {
            return Err(ReconError::ConfigValidation(format!(
                "job '{}' has no strategies",
                job.name
            )));
        }
        check_capabilities(store.capabilities(), &job)?;
        Ok(Self {
            store,
            job,
            audit,
            cancel: None,
        })
    }

    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub fn into_parts(self) -> (S, A) {
        (self.store, self.audit)
    }

    /// Reconcile the next `batch_size` candidates after `offset`.
    pub fn run_batch(&mut self, offset: BatchOffset, batch_size: usize) -> Result<BatchReport, ReconError> {
        self.run(RunMode::Execute, offset, batch_size)
    }

    /// Same as [`run_batch`](Self::run_batch) but never writes; the report
    /// describes what would change.
    pub fn preview_batch(&mut self, offset: BatchOffset, batch_size: usize) -> Result<BatchReport, ReconError> {
        self.run(RunMode::Preview, offset, batch_size)
    }

    fn run(&mut self, mode: RunMode, offset: BatchOffset, batch_size: usize) -> Result<BatchReport, ReconError> {
        let Self {
            store,
            job,
            audit,
            cancel,
        } = self;

        let page = enumerate(&*store, &job.dataset, offset, batch_size)?;
        tracing::debug!(
            job = %job.name,
            dataset = %job.dataset,
            %offset,
            candidates = page.ids.len(),
            has_more = page.has_more,
            "batch enumerated"
        );

        let mut builder =
            ReportBuilder::new(&job.name, &job.dataset, mode, offset).with_caps(job.sample_cap, job.change_cap);
        let mut preview = PreviewState::default();
        let mut last = offset.after;
        let mut cancelled = false;

        for id in page.ids.iter().copied() {
            if cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                cancelled = true;
                break;
            }

            let (outcome, attributes) = reconcile_one(store, job, id, mode, &mut preview)?;
            tracing::debug!(id = %id, category = %outcome.category(), "candidate processed");

            if !matches!(outcome, Outcome::AlreadyCorrect) {
                audit.record(&AuditEvent {
                    job: job.name.clone(),
                    dataset: job.dataset.clone(),
                    id,
                    mode,
                    category: outcome.category(),
                    detail: describe(&outcome),
                });
            }
            builder.record(id, &outcome, &attributes);
            last = Some(id);
        }

        let done = !cancelled && !page.has_more;
        let report = builder.finalize(BatchOffset { after: last }, done, cancelled);

        let s = &report.summary;
        tracing::info!(
            job = %job.name,
            dataset = %job.dataset,
            %mode,
            total = s.total,
            already_correct = s.already_correct,
            repaired = s.repaired_total(),
            merged = s.merged,
            unmatched = s.unmatched,
            errors = s.errors,
            next = %report.next_offset,
            done,
            cancelled,
            "batch finished"
        );
        Ok(report)
    }
}

fn check_capabilities(offered: Capabilities, job: &Job) -> Result<(), ReconError> {
    if job.merge.is_some() {
        let merge_needs = Capabilities {
            key_lookup: true,
            delete: true,
            ..Capabilities::NONE
        };
        if let Some(capability) = first_missing(merge_needs, offered) {
            return Err(ReconError::MissingCapability {
                capability,
                required_by: format!("merge in job '{}'", job.name),
            });
        }
    }
    for strategy in job.chain.iter() {
        if let Some(capability) = first_missing(strategy.requires(), offered) {
            return Err(ReconError::MissingCapability {
                capability,
                required_by: format!("strategy '{}'", strategy.name()),
            });
        }
    }
    Ok(())
}

fn first_missing(required: Capabilities, offered: Capabilities) -> Option<&'static str> {
    [
        ("attribute_lookup", required.attribute_lookup, offered.attribute_lookup),
        ("key_lookup", required.key_lookup, offered.key_lookup),
        ("delete", required.delete, offered.delete),
    ]
    .into_iter()
    .find(|(_, needed, has)| *needed && !*has)
    .map(|(name, _, _)| name)
}

// ---------------------------------------------------------------------------
// Per-candidate pipeline
// ---------------------------------------------------------------------------

/// Nothing is written in preview, so merge keys and counters that an execute
/// run would have stored are tracked here instead. Every record visited in
/// the batch ends up either in `projected` (it stays) or in `removed` (it was
/// folded into a primary).
#[derive(Debug, Default)]
struct PreviewState {
    keys: HashMap<MergeKey, RecordId>,
    projected: HashMap<RecordId, Candidate>,
    removed: HashSet<RecordId>,
}

impl PreviewState {
    /// `candidate` stays in the dataset under `key` once the batch is applied.
    fn keep(&mut self, key: MergeKey, candidate: Candidate) {
        self.keys.entry(key).or_insert(candidate.id);
        self.projected.insert(candidate.id, candidate);
    }

    fn visited(&self, id: RecordId) -> bool {
        self.projected.contains_key(&id) || self.removed.contains(&id)
    }
}

/// In preview, a record that is left untouched still counts as a possible
/// merge primary for later candidates.
fn keep_unchanged(job: &Job, mode: RunMode, preview: &mut PreviewState, candidate: &Candidate) {
    if mode.writes() {
        return;
    }
    if let Some(spec) = &job.merge {
        preview.keep(spec.key_of(candidate), candidate.clone());
    }
}

/// Resolve → mutate → merge for one candidate. Only a strict-mode invariant
/// violation escapes as `Err`; every other failure becomes an outcome.
fn reconcile_one<S: Store>(
    store: &mut S,
    job: &Job,
    id: RecordId,
    mode: RunMode,
    preview: &mut PreviewState,
) -> Result<(Outcome, Attributes), ReconError> {
    let dataset = job.dataset.as_str();

    let candidate = match store.read(dataset, id) {
        Ok(Some(candidate)) => candidate,
        Ok(None) => {
            return Ok((
                Outcome::error(format!("record {id} disappeared before it was processed")),
                Attributes::new(),
            ))
        }
        Err(e) => return Ok((Outcome::error(format!("read failed: {e}")), Attributes::new())),
    };

    let resolved = match job.chain.resolve(&candidate, &*store) {
        Ok(Resolution::Resolved(resolved)) => resolved,
        Ok(Resolution::Unresolved) => {
            keep_unchanged(job, mode, preview, &candidate);
            return Ok((Outcome::Unmatched, candidate.attributes));
        }
        Err(e) => {
            keep_unchanged(job, mode, preview, &candidate);
            return Ok((
                Outcome::error(format!("resolve failed: {e}")),
                candidate.attributes,
            ));
        }
    };

    let (staged, changes) = mutate::diff(&candidate, &resolved.value);

    if let Some(spec) = &job.merge {
        let projected = candidate.projected(&staged);
        let key = spec.key_of(&projected);
        match find_primary(&*store, dataset, spec, &key, id, mode, preview) {
            Err(e) => {
                keep_unchanged(job, mode, preview, &candidate);
                return Ok((
                    Outcome::error(format!("duplicate lookup failed: {e}")),
                    candidate.attributes,
                ));
            }
            Ok(Some(primary)) => {
                let outcome = fold_into(store, job, spec, primary, &projected, mode, preview)?;
                if matches!(outcome, Outcome::Merged { .. }) {
                    if !mode.writes() {
                        preview.removed.insert(id);
                    }
                } else {
                    keep_unchanged(job, mode, preview, &candidate);
                }
                return Ok((outcome, candidate.attributes));
            }
            Ok(None) => {
                if !mode.writes() {
                    preview.keep(key, projected);
                }
            }
        }
    }

    let outcome = match mutate::apply(store, dataset, id, &staged, changes, mode) {
        Mutation::Skipped => Outcome::AlreadyCorrect,
        Mutation::Applied(changes) => Outcome::Repaired {
            strategy: resolved.strategy,
            changes,
        },
        Mutation::Failed(reason) => Outcome::Error { reason },
    };
    Ok((outcome, candidate.attributes))
}

/// The lowest-id record sharing `key` that sorts before `id`. Records with a
/// higher id are not primaries: they fold into this one when their turn comes.
fn find_primary<S: StoreRead + ?Sized>(
    store: &S,
    dataset: &str,
    spec: &MergeSpec,
    key: &MergeKey,
    id: RecordId,
    mode: RunMode,
    preview: &PreviewState,
) -> Result<Option<RecordId>, crate::error::StoreError> {
    let found = store
        .exists_with_key(dataset, &spec.key, key, id)?
        .filter(|other| *other < id);
    if mode.writes() {
        return Ok(found);
    }

    // Visited records are represented by `preview.keys`, not by what is still
    // stored. Unvisited records below `id` all sort before the batch, so when
    // the lowest stored match is visited none of them shares the key.
    let stored = found.filter(|other| !preview.visited(*other));
    let claimed = preview.keys.get(key).copied().filter(|claimed| *claimed < id);
    Ok(stored.into_iter().chain(claimed).min())
}

fn fold_into<S: Store>(
    store: &mut S,
    job: &Job,
    spec: &MergeSpec,
    primary_id: RecordId,
    duplicate: &Candidate,
    mode: RunMode,
    preview: &mut PreviewState,
) -> Result<Outcome, ReconError> {
    let dataset = job.dataset.as_str();

    let primary = match preview.projected.get(&primary_id) {
        Some(projected) if !mode.writes() => projected.clone(),
        _ => match store.read(dataset, primary_id) {
            Ok(Some(primary)) => primary,
            Ok(None) => {
                return Ok(Outcome::error(format!(
                    "merge primary {primary_id} disappeared"
                )))
            }
            Err(e) => return Ok(Outcome::error(format!("reading merge primary {primary_id} failed: {e}"))),
        },
    };

    let merged = match merge::plan(spec, &primary, duplicate) {
        Ok(merged) => merged,
        Err(e) if e.is_invariant_violation() => {
            tracing::error!(
                job = %job.name,
                dataset,
                primary = %primary_id,
                duplicate = %duplicate.id,
                "merge key mismatch; nothing written"
            );
            if job.strict_invariants {
                return Err(ReconError::InvariantViolation(e.to_string()));
            }
            return Ok(Outcome::error(e.to_string()));
        }
        Err(e) => return Ok(Outcome::error(e.to_string())),
    };

    if mode.writes() {
        if let Err(e) = merge::execute(store, dataset, &merged) {
            tracing::warn!(dataset, primary = %primary_id, duplicate = %duplicate.id, error = %e, "merge failed");
            return Ok(Outcome::error(e.to_string()));
        }
    } else {
        preview.keep(spec.key_of(duplicate), primary.projected(merged.totals()));
    }

    Ok(Outcome::Merged {
        into: primary_id,
        changes: merged.changes,
    })
}

fn describe(outcome: &Outcome) -> Option<String> {
    match outcome {
        Outcome::Repaired { changes, .. } => Some(
            changes
                .iter()
                .map(|(name, c)| format!("{name}: {} -> {}", c.from, c.to))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Outcome::Merged { into, .. } => Some(format!("merged into {into}")),
        Outcome::Error { reason } => Some(reason.clone()),
        Outcome::AlreadyCorrect | Outcome::Unmatched => None,
    }
}
