//! In-memory [`Store`] used by tests and dry runs over exported data.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreError;
use crate::merge::MergeKey;
use crate::model::{AttrValue, Attributes, Candidate, ChangeSet, RecordId};
use crate::store::{Capabilities, Store, StoreRead};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: BTreeMap<String, BTreeMap<RecordId, Attributes>>,
    capabilities: Capabilities,
    unavailable: bool,
    reject_writes: BTreeSet<RecordId>,
    reject_deletes: BTreeSet<RecordId>,
    writes: usize,
    deletes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dataset: &str, id: impl Into<RecordId>, attributes: Attributes) {
        self.datasets
            .entry(dataset.to_string())
            .or_default()
            .insert(id.into(), attributes);
    }

    /// Builder form of [`insert`](Self::insert) taking `(name, value)` pairs.
    pub fn with_record<I, K, V>(mut self, dataset: &str, id: u64, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let attributes = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.insert(dataset, id, attributes);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make every read fail with `Unavailable`.
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Make commits to `id` fail with `Rejected`.
    pub fn reject_writes_for(&mut self, id: impl Into<RecordId>) {
        self.reject_writes.insert(id.into());
    }

    pub fn reject_deletes_for(&mut self, id: impl Into<RecordId>) {
        self.reject_deletes.insert(id.into());
    }

    pub fn get(&self, dataset: &str, id: impl Into<RecordId>) -> Option<&Attributes> {
        self.datasets.get(dataset)?.get(&id.into())
    }

    pub fn records(&self, dataset: &str) -> Option<&BTreeMap<RecordId, Attributes>> {
        self.datasets.get(dataset)
    }

    pub fn len(&self, dataset: &str) -> usize {
        self.datasets.get(dataset).map_or(0, BTreeMap::len)
    }

    /// Number of successful commits so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn delete_count(&self) -> usize {
        self.deletes
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn dataset(&self, dataset: &str) -> Option<&BTreeMap<RecordId, Attributes>> {
        self.datasets.get(dataset)
    }
}

impl StoreRead for MemoryStore {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn list_ids(
        &self,
        dataset: &str,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError> {
        self.check_available()?;
        let Some(records) = self.dataset(dataset) else {
            return Ok(Vec::new());
        };
        let ids = match after {
            Some(after) => records
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .map(|(id, _)| *id)
                .take(limit)
                .collect(),
            None => records.keys().copied().take(limit).collect(),
        };
        Ok(ids)
    }

    fn read(&self, dataset: &str, id: RecordId) -> Result<Option<Candidate>, StoreError> {
        self.check_available()?;
        Ok(self
            .dataset(dataset)
            .and_then(|records| records.get(&id))
            .map(|attrs| Candidate::new(id, attrs.clone())))
    }

    fn find_by_attribute(
        &self,
        dataset: &str,
        attribute: &str,
        value: &AttrValue,
    ) -> Result<Option<Candidate>, StoreError> {
        self.check_available()?;
        if value.is_empty() {
            return Ok(None);
        }
        Ok(self.dataset(dataset).and_then(|records| {
            records
                .iter()
                .find(|(_, attrs)| attrs.get(attribute) == Some(value))
                .map(|(id, attrs)| Candidate::new(*id, attrs.clone()))
        }))
    }

    fn exists_with_key(
        &self,
        dataset: &str,
        attributes: &[String],
        key: &MergeKey,
        exclude: RecordId,
    ) -> Result<Option<RecordId>, StoreError> {
        self.check_available()?;
        Ok(self.dataset(dataset).and_then(|records| {
            records
                .iter()
                .filter(|(id, _)| **id != exclude)
                .find(|(_, attrs)| MergeKey::of(attributes, attrs) == *key)
                .map(|(id, _)| *id)
        }))
    }
}

impl Store for MemoryStore {
    fn commit(&mut self, dataset: &str, id: RecordId, changes: &ChangeSet) -> Result<(), StoreError> {
        self.check_available()?;
        if self.reject_writes.contains(&id) {
            return Err(StoreError::Rejected(format!("write to record {id} refused")));
        }
        let attrs = self
            .datasets
            .get_mut(dataset)
            .and_then(|records| records.get_mut(&id))
            .ok_or_else(|| StoreError::NotFound {
                dataset: dataset.to_string(),
                id,
            })?;
        for (name, value) in changes.iter() {
            attrs.insert(name.clone(), value.clone());
        }
        self.writes += 1;
        Ok(())
    }

    fn delete(&mut self, dataset: &str, id: RecordId) -> Result<(), StoreError> {
        self.check_available()?;
        if self.reject_deletes.contains(&id) {
            return Err(StoreError::Rejected(format!("delete of record {id} refused")));
        }
        self.datasets
            .get_mut(dataset)
            .and_then(|records| records.remove(&id))
            .ok_or_else(|| StoreError::NotFound {
                dataset: dataset.to_string(),
                id,
            })?;
        self.deletes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_record("rows", 3, [("k", AttrValue::from("a"))])
            .with_record("rows", 1, [("k", AttrValue::from("a"))])
            .with_record("rows", 2, [("k", AttrValue::from("b"))])
    }

    #[test]
    fn list_ids_is_ascending_keyset() {
        let s = store();
        assert_eq!(s.list_ids("rows", None, 10).unwrap(), vec![RecordId(1), RecordId(2), RecordId(3)]);
        assert_eq!(s.list_ids("rows", Some(RecordId(1)), 1).unwrap(), vec![RecordId(2)]);
        assert!(s.list_ids("rows", Some(RecordId(3)), 10).unwrap().is_empty());
        assert!(s.list_ids("missing", None, 10).unwrap().is_empty());
    }

    #[test]
    fn key_lookup_excludes_self_and_picks_lowest() {
        let s = store();
        let attrs = vec!["k".to_string()];
        let key = MergeKey(vec![AttrValue::from("a")]);
        assert_eq!(s.exists_with_key("rows", &attrs, &key, RecordId(3)).unwrap(), Some(RecordId(1)));
        assert_eq!(s.exists_with_key("rows", &attrs, &key, RecordId(1)).unwrap(), Some(RecordId(3)));
        let key_b = MergeKey(vec![AttrValue::from("b")]);
        assert_eq!(s.exists_with_key("rows", &attrs, &key_b, RecordId(2)).unwrap(), None);
    }

    #[test]
    fn rejected_write_leaves_record_untouched() {
        let mut s = store();
        s.reject_writes_for(2);
        let err = s.write("rows", RecordId(2), "k", "z".into()).unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(s.get("rows", 2).unwrap()["k"], AttrValue::from("b"));
        assert_eq!(s.write_count(), 0);
    }

    #[test]
    fn unavailable_fails_reads() {
        let mut s = store();
        s.set_unavailable(true);
        assert!(matches!(s.list_ids("rows", None, 1), Err(StoreError::Unavailable(_))));
    }
}
