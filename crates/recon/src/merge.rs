//! Duplicate collapse: fold a record into the lowest-id record sharing its
//! merge key, summing counters.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::error::StoreError;
use crate::model::{AttrValue, Attributes, Candidate, ChangeSet, FieldChange, RecordId};
use crate::store::Store;

/// Values of the merge-key attributes, in configured order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MergeKey(pub Vec<AttrValue>);

impl MergeKey {
    pub fn of(attributes: &[String], values: &Attributes) -> Self {
        Self(
            attributes
                .iter()
                .map(|name| values.get(name).cloned().unwrap_or(AttrValue::Null))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSpec {
    /// Attributes whose values together identify duplicates.
    pub key: Vec<String>,
    /// Integer attributes added onto the primary.
    pub sum: Vec<String>,
}

impl MergeSpec {
    pub fn new<K, S>(key: impl IntoIterator<Item = K>, sum: impl IntoIterator<Item = S>) -> Self
    where
        K: Into<String>,
        S: Into<String>,
    {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            sum: sum.into_iter().map(Into::into).collect(),
        }
    }

    pub fn key_of(&self, candidate: &Candidate) -> MergeKey {
        MergeKey::of(&self.key, &candidate.attributes)
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge key of {duplicate} does not match primary {primary}")]
    KeyMismatch { primary: RecordId, duplicate: RecordId },
    #[error("record {id}: counter '{field}' is not an integer ({value})")]
    NotACounter {
        id: RecordId,
        field: String,
        value: AttrValue,
    },
    #[error("counter '{field}' overflows when merging {duplicate} into {primary}")]
    Overflow {
        primary: RecordId,
        duplicate: RecordId,
        field: String,
    },
    #[error("summing into {primary} failed: {source}")]
    SumFailed {
        primary: RecordId,
        #[source]
        source: StoreError,
    },
    #[error("counts were added to {primary} but deleting duplicate {duplicate} failed: {source}")]
    DeleteFailed {
        primary: RecordId,
        duplicate: RecordId,
        #[source]
        source: StoreError,
    },
}

impl MergeError {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::KeyMismatch { .. })
    }
}

/// Result of folding `duplicate` into `primary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRecord {
    pub primary: RecordId,
    pub duplicate: RecordId,
    /// Counter changes on the primary.
    pub changes: BTreeMap<String, FieldChange>,
    staged: ChangeSet,
}

impl MergedRecord {
    /// Counter totals the primary ends up with.
    pub fn totals(&self) -> &ChangeSet {
        &self.staged
    }
}

fn counter(candidate: &Candidate, field: &str) -> Result<i64, MergeError> {
    let value = candidate.get(field);
    if value.is_empty() {
        return Ok(0);
    }
    value.as_i64().ok_or_else(|| MergeError::NotACounter {
        id: candidate.id,
        field: field.to_string(),
        value: value.clone(),
    })
}

/// Compute the merged counters without touching the store. Fails if the two
/// records do not share a merge key.
pub fn plan(spec: &MergeSpec, primary: &Candidate, duplicate: &Candidate) -> Result<MergedRecord, MergeError> {
    if spec.key_of(primary) != spec.key_of(duplicate) {
        return Err(MergeError::KeyMismatch {
            primary: primary.id,
            duplicate: duplicate.id,
        });
    }

    let mut changes = BTreeMap::new();
    let mut staged = ChangeSet::new();
    for field in &spec.sum {
        let a = counter(primary, field)?;
        let b = counter(duplicate, field)?;
        let total = a.checked_add(b).ok_or_else(|| MergeError::Overflow {
            primary: primary.id,
            duplicate: duplicate.id,
            field: field.clone(),
        })?;
        if b != 0 {
            changes.insert(
                field.clone(),
                FieldChange {
                    from: primary.get(field).clone(),
                    to: AttrValue::Integer(total),
                },
            );
            staged.stage(field.clone(), total);
        }
    }

    Ok(MergedRecord {
        primary: primary.id,
        duplicate: duplicate.id,
        changes,
        staged,
    })
}

/// Commit the summed counters onto the primary, then delete the duplicate.
/// The duplicate is never deleted unless the sum was committed.
pub fn execute<S: Store + ?Sized>(
    store: &mut S,
    dataset: &str,
    merged: &MergedRecord,
) -> Result<(), MergeError> {
    if !merged.staged.is_empty() {
        store
            .commit(dataset, merged.primary, &merged.staged)
            .map_err(|source| MergeError::SumFailed {
                primary: merged.primary,
                source,
            })?;
    }
    store
        .delete(dataset, merged.duplicate)
        .map_err(|source| MergeError::DeleteFailed {
            primary: merged.primary,
            duplicate: merged.duplicate,
            source,
        })
}

/// Merge two duplicates in one call: lowest id is primary.
pub fn merge<S: Store + ?Sized>(
    store: &mut S,
    dataset: &str,
    spec: &MergeSpec,
    a: &Candidate,
    b: &Candidate,
) -> Result<MergedRecord, MergeError> {
    let (primary, duplicate) = if a.id <= b.id { (a, b) } else { (b, a) };
    let merged = plan(spec, primary, duplicate)?;
    execute(store, dataset, &merged)?;
    Ok(merged)
}
