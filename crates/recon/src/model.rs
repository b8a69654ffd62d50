use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Identity + values
// ---------------------------------------------------------------------------

/// Immutable record identifier. Candidates are always processed in ascending
/// order of this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A stored attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Integer(i64),
    Text(String),
}

impl AttrValue {
    /// `Null` and empty (or whitespace-only) text count as "no value".
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Integer(_) => false,
            Self::Text(s) => s.trim().is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }
}

impl Default for AttrValue {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for AttrValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl TryFrom<RecordId> for AttrValue {
    type Error = StoreError;

    fn try_from(id: RecordId) -> Result<Self, StoreError> {
        i64::try_from(id.0)
            .map(Self::Integer)
            .map_err(|_| StoreError::IdOutOfRange(id))
    }
}

pub type Attributes = BTreeMap<String, AttrValue>;

static NULL: AttrValue = AttrValue::Null;

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// One record under consideration, as currently stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: RecordId,
    pub attributes: Attributes,
}

impl Candidate {
    pub fn new(id: impl Into<RecordId>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    /// Missing attributes read as `Null`.
    pub fn get(&self, name: &str) -> &AttrValue {
        self.attributes.get(name).unwrap_or(&NULL)
    }

    /// The attribute value, unless it is empty.
    pub fn non_empty(&self, name: &str) -> Option<&AttrValue> {
        Some(self.get(name)).filter(|v| !v.is_empty())
    }

    /// A copy of this candidate with `changes` laid over its attributes.
    pub fn projected(&self, changes: &ChangeSet) -> Candidate {
        let mut attributes = self.attributes.clone();
        for (name, value) in changes.iter() {
            attributes.insert(name.clone(), value.clone());
        }
        Candidate {
            id: self.id,
            attributes,
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical value + staged writes
// ---------------------------------------------------------------------------

/// The correct value(s) for a candidate, as computed by one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalValue {
    fields: Attributes,
}

impl CanonicalValue {
    pub fn single(attribute: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        let mut fields = Attributes::new();
        fields.insert(attribute.into(), value.into());
        Self { fields }
    }

    pub fn from_fields(fields: Attributes) -> Self {
        Self { fields }
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.fields.insert(attribute.into(), value.into());
        self
    }

    pub fn fields(&self) -> &Attributes {
        &self.fields
    }

    pub fn get(&self, attribute: &str) -> Option<&AttrValue> {
        self.fields.get(attribute)
    }

    /// True when no field carries a usable value.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(AttrValue::is_empty)
    }
}

/// Attribute writes staged for one record and committed together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    fields: Attributes,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, attribute: impl Into<String>, value: impl Into<AttrValue>) {
        self.fields.insert(attribute.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.fields.iter()
    }

    pub fn get(&self, attribute: &str) -> Option<&AttrValue> {
        self.fields.get(attribute)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Before/after of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: AttrValue,
    pub to: AttrValue,
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// Keyset cursor: a batch starts strictly after `after`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOffset {
    pub after: Option<RecordId>,
}

impl BatchOffset {
    pub fn start() -> Self {
        Self { after: None }
    }

    pub fn after(id: impl Into<RecordId>) -> Self {
        Self {
            after: Some(id.into()),
        }
    }
}

impl fmt::Display for BatchOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.after {
            None => write!(f, "start"),
            Some(id) => write!(f, "after {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Execute,
    Preview,
}

impl RunMode {
    pub fn writes(self) -> bool {
        matches!(self, Self::Execute)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execute => write!(f, "execute"),
            Self::Preview => write!(f, "preview"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AlreadyCorrect,
    Repaired {
        strategy: String,
        changes: BTreeMap<String, FieldChange>,
    },
    Merged {
        into: RecordId,
        changes: BTreeMap<String, FieldChange>,
    },
    Unmatched,
    Error {
        reason: String,
    },
}

impl Outcome {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    /// Report category key for this outcome.
    pub fn category(&self) -> String {
        match self {
            Self::AlreadyCorrect => "already_correct".into(),
            Self::Repaired { strategy, .. } => repaired_category(strategy),
            Self::Merged { .. } => "merged".into(),
            Self::Unmatched => "unmatched".into(),
            Self::Error { .. } => "error".into(),
        }
    }
}

/// `"fallback-author"` -> `"repaired_via_fallback_author"`.
pub fn repaired_category(strategy: &str) -> String {
    let slug: String = strategy
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("repaired_via_{slug}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values() {
        assert!(AttrValue::Null.is_empty());
        assert!(AttrValue::from("  ").is_empty());
        assert!(!AttrValue::from("x").is_empty());
        assert!(!AttrValue::from(0).is_empty());
    }

    #[test]
    fn integer_coercion() {
        assert_eq!(AttrValue::from(" 42 ").as_i64(), Some(42));
        assert_eq!(AttrValue::from("4x").as_i64(), None);
        assert_eq!(AttrValue::Null.as_i64(), None);
    }

    #[test]
    fn untagged_json_shape() {
        let attrs: Attributes =
            serde_json::from_str(r#"{"a": 5, "b": "five", "c": null}"#).unwrap();
        assert_eq!(attrs["a"], AttrValue::Integer(5));
        assert_eq!(attrs["b"], AttrValue::from("five"));
        assert_eq!(attrs["c"], AttrValue::Null);
        assert_eq!(serde_json::to_string(&attrs).unwrap(), r#"{"a":5,"b":"five","c":null}"#);
    }

    #[test]
    fn projection_overlays_changes() {
        let mut attrs = Attributes::new();
        attrs.insert("url".into(), "https://x.test/a/".into());
        attrs.insert("clicks".into(), 3.into());
        let c = Candidate::new(7, attrs);

        let mut cs = ChangeSet::new();
        cs.stage("url", "https://x.test/a");
        let p = c.projected(&cs);
        assert_eq!(p.get("url"), &AttrValue::from("https://x.test/a"));
        assert_eq!(p.get("clicks"), &AttrValue::Integer(3));
        assert_eq!(p.get("missing"), &AttrValue::Null);
        // original untouched
        assert_eq!(c.get("url"), &AttrValue::from("https://x.test/a/"));
    }

    #[test]
    fn category_slug() {
        assert_eq!(repaired_category("fallback-author"), "repaired_via_fallback_author");
        assert_eq!(repaired_category("From Slug"), "repaired_via_from_slug");
        assert_eq!(
            Outcome::Merged { into: RecordId(1), changes: BTreeMap::new() }.category(),
            "merged"
        );
    }

    #[test]
    fn canonical_emptiness() {
        assert!(CanonicalValue::default().is_empty());
        assert!(CanonicalValue::single("owner", AttrValue::Null).is_empty());
        assert!(!CanonicalValue::single("owner", 12).is_empty());
    }
}
