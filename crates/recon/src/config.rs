use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::ReconError;
use crate::model::{repaired_category, AttrValue};
use crate::report::{DEFAULT_CHANGE_CAP, DEFAULT_SAMPLE_CAP};

pub const DEFAULT_BATCH_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub dataset: String,
    /// Attribute the strategies write to.
    pub target: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sample_cap")]
    pub sample_cap: usize,
    #[serde(default = "default_change_cap")]
    pub change_cap: usize,
    /// Abort the run on a merge-key mismatch instead of counting an error.
    #[serde(default)]
    pub strict_invariants: bool,
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub merge: Option<MergeConfig>,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_sample_cap() -> usize {
    DEFAULT_SAMPLE_CAP
}

fn default_change_cap() -> usize {
    DEFAULT_CHANGE_CAP
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: StrategyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    Current,
    Copy {
        from: String,
    },
    Lookup {
        dataset: String,
        match_on: String,
        using: String,
        #[serde(default)]
        take: Option<String>,
    },
    NormalizeUrl {
        #[serde(default)]
        from: Option<String>,
    },
    Constant {
        value: AttrValue,
    },
}

impl StrategyKind {
    /// Attribute names this strategy reads from the candidate or other records.
    fn attributes(&self) -> Vec<&str> {
        match self {
            Self::Current | Self::Constant { .. } => Vec::new(),
            Self::Copy { from } => vec![from.as_str()],
            Self::Lookup {
                match_on,
                using,
                take,
                ..
            } => {
                let mut attrs = vec![match_on.as_str(), using.as_str()];
                attrs.extend(take.as_deref());
                attrs
            }
            Self::NormalizeUrl { from } => from.as_deref().into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    pub key: Vec<String>,
    #[serde(default)]
    pub sum: Vec<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl JobConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: JobConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        for (field, value) in [("name", &self.name), ("dataset", &self.dataset)] {
            if value.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!("{field} must not be empty")));
            }
        }
        check_attribute("target", &self.target)?;

        if self.batch_size == 0 {
            return Err(ReconError::ConfigValidation("batch_size must be at least 1".into()));
        }

        if self.strategies.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one strategy is required".into(),
            ));
        }

        // Report categories are derived from names, so uniqueness is checked
        // on the derived key.
        let mut seen = BTreeSet::new();
        for strategy in &self.strategies {
            if strategy.name.trim().is_empty() {
                return Err(ReconError::ConfigValidation("strategy name must not be empty".into()));
            }
            if !seen.insert(repaired_category(&strategy.name)) {
                return Err(ReconError::ConfigValidation(format!(
                    "duplicate strategy name '{}'",
                    strategy.name
                )));
            }
            for attr in strategy.kind.attributes() {
                check_attribute(&format!("strategy '{}'", strategy.name), attr)?;
            }
            if let StrategyKind::Lookup { dataset, .. } = &strategy.kind {
                if dataset.trim().is_empty() {
                    return Err(ReconError::ConfigValidation(format!(
                        "strategy '{}': lookup dataset must not be empty",
                        strategy.name
                    )));
                }
            }
        }

        if let Some(merge) = &self.merge {
            if merge.key.is_empty() {
                return Err(ReconError::ConfigValidation("merge.key must not be empty".into()));
            }
            for attr in merge.key.iter().chain(&merge.sum) {
                check_attribute("merge", attr)?;
            }
            if let Some(both) = merge.sum.iter().find(|s| merge.key.contains(*s)) {
                return Err(ReconError::ConfigValidation(format!(
                    "merge: '{both}' cannot be both a key and a summed field"
                )));
            }
            if merge.sum.contains(&self.target) {
                return Err(ReconError::ConfigValidation(format!(
                    "merge: target '{}' cannot be a summed field",
                    self.target
                )));
            }
        }

        Ok(())
    }
}

/// Attribute names end up inside store queries; keep them to a safe alphabet.
fn check_attribute(context: &str, name: &str) -> Result<(), ReconError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ReconError::ConfigValidation(format!(
            "{context}: invalid attribute name '{name}'"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const OWNERSHIP: &str = r#"
name = "artist-ownership-repair"
dataset = "artist_profiles"
target = "owner_id"
batch_size = 25

[[strategies]]
name = "existing-owner"
kind = "current"

[[strategies]]
name = "fallback-author"
kind = "copy"
from = "author_id"

[[strategies]]
name = "from-slug"
kind = "lookup"
dataset = "users"
match_on = "login"
using = "slug"
"#;

    #[test]
    fn parse_chain_in_order() {
        let config = JobConfig::from_toml(OWNERSHIP).unwrap();
        assert_eq!(config.name, "artist-ownership-repair");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.sample_cap, DEFAULT_SAMPLE_CAP);
        assert!(!config.strict_invariants);
        assert!(config.merge.is_none());

        let names: Vec<_> = config.strategies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["existing-owner", "fallback-author", "from-slug"]);
        assert_eq!(config.strategies[0].kind, StrategyKind::Current);
        assert_eq!(
            config.strategies[2].kind,
            StrategyKind::Lookup {
                dataset: "users".into(),
                match_on: "login".into(),
                using: "slug".into(),
                take: None,
            }
        );
    }

    #[test]
    fn parse_merge_and_constant() {
        let input = r#"
name = "url-cleanup"
dataset = "link_clicks"
target = "url"

[[strategies]]
name = "normalized"
kind = "normalize_url"

[[strategies]]
name = "placeholder"
kind = "constant"
value = 0

[merge]
key = ["post_id", "date", "url"]
sum = ["clicks"]
"#;
        let config = JobConfig::from_toml(input).unwrap();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.strategies[0].kind, StrategyKind::NormalizeUrl { from: None });
        assert_eq!(
            config.strategies[1].kind,
            StrategyKind::Constant { value: AttrValue::Integer(0) }
        );
        let merge = config.merge.unwrap();
        assert_eq!(merge.key, ["post_id", "date", "url"]);
        assert_eq!(merge.sum, ["clicks"]);
    }

    #[test]
    fn reject_unknown_kind() {
        let input = OWNERSHIP.replace("kind = \"current\"", "kind = \"guess\"");
        let err = JobConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn reject_empty_chain() {
        let input = r#"
name = "x"
dataset = "d"
target = "t"
strategies = []
"#;
        let err = JobConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("at least one strategy"));
    }

    #[test]
    fn reject_duplicate_strategy_names() {
        let input = OWNERSHIP.replace("name = \"from-slug\"", "name = \"fallback_author\"");
        let err = JobConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("duplicate strategy name"));
    }

    #[test]
    fn reject_zero_batch() {
        let input = OWNERSHIP.replace("batch_size = 25", "batch_size = 0");
        let err = JobConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn reject_bad_attribute_name() {
        let input = OWNERSHIP.replace("from = \"author_id\"", "from = \"author\\\"id\"");
        let err = JobConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("invalid attribute name"));
    }

    #[test]
    fn reject_sum_overlapping_key() {
        let input = format!("{OWNERSHIP}\n[merge]\nkey = [\"slug\"]\nsum = [\"slug\"]\n");
        let err = JobConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("both a key and a summed field"));
    }
}
