//! Capability interfaces the reconciler consumes.
//!
//! Reads and writes are split so resolution strategies can only ever see a
//! read-only view of the store.

use serde::Serialize;

use crate::error::StoreError;
use crate::model::{AttrValue, Candidate, ChangeSet, RecordId};
use crate::merge::MergeKey;

/// Optional capabilities a store may or may not offer. Checked once when a
/// [`Reconciler`](crate::Reconciler) is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// `find_by_attribute` is supported.
    pub attribute_lookup: bool,
    /// `exists_with_key` is supported.
    pub key_lookup: bool,
    /// `delete` is supported.
    pub delete: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        attribute_lookup: true,
        key_lookup: true,
        delete: true,
    };

    pub const NONE: Self = Self {
        attribute_lookup: false,
        key_lookup: false,
        delete: false,
    };
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::ALL
    }
}

pub trait StoreRead {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    /// Up to `limit` identifiers of `dataset` strictly greater than `after`,
    /// ascending.
    fn list_ids(
        &self,
        dataset: &str,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError>;

    /// Current state of a record, or `None` if it does not exist.
    fn read(&self, dataset: &str, id: RecordId) -> Result<Option<Candidate>, StoreError>;

    /// The lowest-id record of `dataset` whose `attribute` equals `value`.
    fn find_by_attribute(
        &self,
        dataset: &str,
        attribute: &str,
        value: &AttrValue,
    ) -> Result<Option<Candidate>, StoreError>;

    /// The lowest id other than `exclude` whose values at `attributes` equal
    /// `key`. Missing attributes compare as `Null`.
    fn exists_with_key(
        &self,
        dataset: &str,
        attributes: &[String],
        key: &MergeKey,
        exclude: RecordId,
    ) -> Result<Option<RecordId>, StoreError>;
}

pub trait Store: StoreRead {
    /// Apply every staged field of `changes` to one record atomically.
    fn commit(&mut self, dataset: &str, id: RecordId, changes: &ChangeSet) -> Result<(), StoreError>;

    fn delete(&mut self, dataset: &str, id: RecordId) -> Result<(), StoreError>;

    /// Single-attribute write.
    fn write(
        &mut self,
        dataset: &str,
        id: RecordId,
        attribute: &str,
        value: AttrValue,
    ) -> Result<(), StoreError> {
        let mut changes = ChangeSet::new();
        changes.stage(attribute, value);
        self.commit(dataset, id, &changes)
    }
}

impl<S: StoreRead + ?Sized> StoreRead for &mut S {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn list_ids(
        &self,
        dataset: &str,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError> {
        (**self).list_ids(dataset, after, limit)
    }

    fn read(&self, dataset: &str, id: RecordId) -> Result<Option<Candidate>, StoreError> {
        (**self).read(dataset, id)
    }

    fn find_by_attribute(
        &self,
        dataset: &str,
        attribute: &str,
        value: &AttrValue,
    ) -> Result<Option<Candidate>, StoreError> {
        (**self).find_by_attribute(dataset, attribute, value)
    }

    fn exists_with_key(
        &self,
        dataset: &str,
        attributes: &[String],
        key: &MergeKey,
        exclude: RecordId,
    ) -> Result<Option<RecordId>, StoreError> {
        (**self).exists_with_key(dataset, attributes, key, exclude)
    }
}

impl<S: Store + ?Sized> Store for &mut S {
    fn commit(&mut self, dataset: &str, id: RecordId, changes: &ChangeSet) -> Result<(), StoreError> {
        (**self).commit(dataset, id, changes)
    }

    fn delete(&mut self, dataset: &str, id: RecordId) -> Result<(), StoreError> {
        (**self).delete(dataset, id)
    }
}
