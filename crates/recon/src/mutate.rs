use std::collections::BTreeMap;

use crate::model::{Candidate, CanonicalValue, ChangeSet, FieldChange, RecordId, RunMode};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Fields written (or that would be written, in preview).
    Applied(BTreeMap<String, FieldChange>),
    /// Stored value already equals the canonical value; nothing written.
    Skipped,
    Failed(String),
}

/// Fields of `canonical` that differ from what `candidate` currently holds.
pub fn diff(candidate: &Candidate, canonical: &CanonicalValue) -> (ChangeSet, BTreeMap<String, FieldChange>) {
    let mut staged = ChangeSet::new();
    let mut changes = BTreeMap::new();
    for (name, to) in canonical.fields() {
        let from = candidate.get(name);
        if from != to {
            staged.stage(name.clone(), to.clone());
            changes.insert(
                name.clone(),
                FieldChange {
                    from: from.clone(),
                    to: to.clone(),
                },
            );
        }
    }
    (staged, changes)
}

/// Write the differing fields in a single commit. Never returns an error:
/// a rejected write becomes [`Mutation::Failed`] so the batch can go on.
pub fn apply<S: Store + ?Sized>(
    store: &mut S,
    dataset: &str,
    id: RecordId,
    staged: &ChangeSet,
    changes: BTreeMap<String, FieldChange>,
    mode: RunMode,
) -> Mutation {
    if staged.is_empty() {
        return Mutation::Skipped;
    }
    if mode.writes() {
        if let Err(e) = store.commit(dataset, id, staged) {
            tracing::warn!(dataset, id = %id, error = %e, "write failed");
            return Mutation::Failed(e.to_string());
        }
    }
    Mutation::Applied(changes)
}
