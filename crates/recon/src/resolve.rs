use crate::error::StoreError;
use crate::model::{Candidate, CanonicalValue};
use crate::store::{Capabilities, StoreRead};

/// One named way of deriving a candidate's canonical value.
///
/// Implementations only read; every write goes through the mutator.
pub trait ResolutionStrategy {
    fn name(&self) -> &str;

    /// `Ok(None)` (or an empty value) passes the candidate on to the next
    /// strategy in the chain.
    fn resolve(
        &self,
        candidate: &Candidate,
        store: &dyn StoreRead,
    ) -> Result<Option<CanonicalValue>, StoreError>;

    /// Store capabilities this strategy relies on.
    fn requires(&self) -> Capabilities {
        Capabilities::NONE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: CanonicalValue,
    /// Name of the strategy that produced `value`.
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Resolved),
    Unresolved,
}

/// Strategies in fixed priority order.
#[derive(Default)]
pub struct StrategyChain {
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl StrategyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, strategy: Box<dyn ResolutionStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn with(mut self, strategy: impl ResolutionStrategy + 'static) -> Self {
        self.push(Box::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ResolutionStrategy> {
        self.strategies.iter().map(|s| s.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|s| s.name()).collect()
    }

    /// First non-empty strategy output wins. A store error from any strategy
    /// stops the chain; later strategies are never consulted in its place.
    pub fn resolve(&self, candidate: &Candidate, store: &dyn StoreRead) -> Result<Resolution, StoreError> {
        for strategy in &self.strategies {
            match strategy.resolve(candidate, store)? {
                Some(value) if !value.is_empty() => {
                    tracing::trace!(id = %candidate.id, strategy = strategy.name(), "resolved");
                    return Ok(Resolution::Resolved(Resolved {
                        value,
                        strategy: strategy.name().to_string(),
                    }));
                }
                _ => continue,
            }
        }
        Ok(Resolution::Unresolved)
    }
}

impl std::fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
