use crate::config::JobConfig;
use crate::error::ReconError;
use crate::merge::MergeSpec;
use crate::report::{DEFAULT_CHANGE_CAP, DEFAULT_SAMPLE_CAP};
use crate::resolve::{ResolutionStrategy, StrategyChain};
use crate::strategies;

/// A runnable reconciliation: which dataset, which attribute, which chain.
#[derive(Debug)]
pub struct Job {
    pub name: String,
    pub dataset: String,
    pub target: String,
    pub chain: StrategyChain,
    pub merge: Option<MergeSpec>,
    pub sample_cap: usize,
    pub change_cap: usize,
    pub strict_invariants: bool,
}

impl Job {
    pub fn new(name: impl Into<String>, dataset: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dataset: dataset.into(),
            target: target.into(),
            chain: StrategyChain::new(),
            merge: None,
            sample_cap: DEFAULT_SAMPLE_CAP,
            change_cap: DEFAULT_CHANGE_CAP,
            strict_invariants: false,
        }
    }

    pub fn strategy(mut self, strategy: impl ResolutionStrategy + 'static) -> Self {
        self.chain.push(Box::new(strategy));
        self
    }

    pub fn merge(mut self, spec: MergeSpec) -> Self {
        self.merge = Some(spec);
        self
    }

    pub fn sample_cap(mut self, cap: usize) -> Self {
        self.sample_cap = cap;
        self
    }

    pub fn change_cap(mut self, cap: usize) -> Self {
        self.change_cap = cap;
        self
    }

    pub fn strict_invariants(mut self, strict: bool) -> Self {
        self.strict_invariants = strict;
        self
    }

    /// Validate `config` and build its strategy chain.
    pub fn from_config(config: &JobConfig) -> Result<Self, ReconError> {
        config.validate()?;

        let mut chain = StrategyChain::new();
        for strategy in &config.strategies {
            chain.push(strategies::build(strategy, &config.target));
        }

        Ok(Self {
            name: config.name.clone(),
            dataset: config.dataset.clone(),
            target: config.target.clone(),
            chain,
            merge: config
                .merge
                .as_ref()
                .map(|m| MergeSpec::new(m.key.iter().cloned(), m.sum.iter().cloned())),
            sample_cap: config.sample_cap,
            change_cap: config.change_cap,
            strict_invariants: config.strict_invariants,
        })
    }

    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        Self::from_config(&JobConfig::from_toml(input)?)
    }
}
