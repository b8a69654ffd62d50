//! Built-in resolution strategies, selectable from a job file by `kind`.

use crate::config::{StrategyConfig, StrategyKind};
use crate::error::StoreError;
use crate::model::{AttrValue, Candidate, CanonicalValue};
use crate::normalize::normalize_url;
use crate::resolve::ResolutionStrategy;
use crate::store::{Capabilities, StoreRead};

/// Keep the target's current value when it has one.
#[derive(Debug, Clone)]
pub struct Current {
    pub name: String,
    pub target: String,
}

impl ResolutionStrategy for Current {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, candidate: &Candidate, _: &dyn StoreRead) -> Result<Option<CanonicalValue>, StoreError> {
        Ok(candidate
            .non_empty(&self.target)
            .map(|v| CanonicalValue::single(&self.target, v.clone())))
    }
}

/// Take the value of another attribute on the same record.
#[derive(Debug, Clone)]
pub struct CopyFrom {
    pub name: String,
    pub target: String,
    pub from: String,
}

impl ResolutionStrategy for CopyFrom {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, candidate: &Candidate, _: &dyn StoreRead) -> Result<Option<CanonicalValue>, StoreError> {
        Ok(candidate
            .non_empty(&self.from)
            .map(|v| CanonicalValue::single(&self.target, v.clone())))
    }
}

/// Find the lowest-id record in another dataset whose `match_on` equals this
/// record's `using`, and take its `take` attribute (or its id).
#[derive(Debug, Clone)]
pub struct Lookup {
    pub name: String,
    pub target: String,
    pub dataset: String,
    pub match_on: String,
    pub using: String,
    pub take: Option<String>,
}

impl ResolutionStrategy for Lookup {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, candidate: &Candidate, store: &dyn StoreRead) -> Result<Option<CanonicalValue>, StoreError> {
        let Some(needle) = candidate.non_empty(&self.using) else {
            return Ok(None);
        };
        let Some(found) = store.find_by_attribute(&self.dataset, &self.match_on, needle)? else {
            return Ok(None);
        };
        let value = match &self.take {
            Some(attr) => found.get(attr).clone(),
            None => AttrValue::try_from(found.id)?,
        };
        Ok(Some(CanonicalValue::single(&self.target, value)))
    }

    fn requires(&self) -> Capabilities {
        Capabilities {
            attribute_lookup: true,
            ..Capabilities::NONE
        }
    }
}

/// Normalized form of a URL attribute.
#[derive(Debug, Clone)]
pub struct NormalizeUrl {
    pub name: String,
    pub target: String,
    pub from: String,
}

impl ResolutionStrategy for NormalizeUrl {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, candidate: &Candidate, _: &dyn StoreRead) -> Result<Option<CanonicalValue>, StoreError> {
        Ok(candidate
            .get(&self.from)
            .as_str()
            .and_then(normalize_url)
            .map(|url| CanonicalValue::single(&self.target, url)))
    }
}

/// Last-resort fixed value.
#[derive(Debug, Clone)]
pub struct Constant {
    pub name: String,
    pub target: String,
    pub value: AttrValue,
}

impl ResolutionStrategy for Constant {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, _: &Candidate, _: &dyn StoreRead) -> Result<Option<CanonicalValue>, StoreError> {
        Ok(Some(CanonicalValue::single(&self.target, self.value.clone())))
    }
}

/// Instantiate a configured strategy writing to `target`.
pub fn build(config: &StrategyConfig, target: &str) -> Box<dyn ResolutionStrategy> {
    let name = config.name.clone();
    let target = target.to_string();
    match &config.kind {
        StrategyKind::Current => Box::new(Current { name, target }),
        StrategyKind::Copy { from } => Box::new(CopyFrom {
            name,
            target,
            from: from.clone(),
        }),
        StrategyKind::Lookup {
            dataset,
            match_on,
            using,
            take,
        } => Box::new(Lookup {
            name,
            target,
            dataset: dataset.clone(),
            match_on: match_on.clone(),
            using: using.clone(),
            take: take.clone(),
        }),
        StrategyKind::NormalizeUrl { from } => Box::new(NormalizeUrl {
            name,
            from: from.clone().unwrap_or_else(|| target.clone()),
            target,
        }),
        StrategyKind::Constant { value } => Box::new(Constant {
            name,
            target,
            value: value.clone(),
        }),
    }
}
