use crate::error::ReconError;
use crate::model::{BatchOffset, RecordId};
use crate::store::StoreRead;

/// One batch worth of candidate identifiers, ascending.
///
/// Only identifiers are enumerated up front; each candidate's attributes are
/// read right before it is processed, so a merge earlier in the batch is
/// visible to later candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub ids: Vec<RecordId>,
    pub has_more: bool,
}

pub fn enumerate<S: StoreRead + ?Sized>(
    store: &S,
    dataset: &str,
    offset: BatchOffset,
    batch_size: usize,
) -> Result<Page, ReconError> {
    if batch_size == 0 {
        return Err(ReconError::ConfigValidation("batch_size must be at least 1".into()));
    }

    // One extra id tells us whether another batch follows.
    let mut ids = store
        .list_ids(dataset, offset.after, batch_size.saturating_add(1))
        .map_err(|source| ReconError::SourceUnavailable {
            dataset: dataset.to_string(),
            source,
        })?;

    let has_more = ids.len() > batch_size;
    ids.truncate(batch_size);
    Ok(Page { ids, has_more })
}
