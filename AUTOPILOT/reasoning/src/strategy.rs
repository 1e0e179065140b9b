use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::StrategyError;

/// One way of turning an input into a typed result.
#[async_trait]
pub trait Strategy<I, O>: Send + Sync
where
    I: Sync + ?Sized,
    O: Send,
{
    /// Name recorded as the origin of the result.
    fn name(&self) -> &'static str;

    /// Produces a result or explains why it could not.
    async fn run(&self, input: &I) -> Result<O, StrategyError>;
}

/// Output of a chain together with the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<O> {
    /// Strategy that succeeded.
    pub strategy: &'static str,
    /// Its output.
    pub output: O,
    /// Failures of the strategies tried before it.
    pub skipped: Vec<String>,
}

/// Ordered strategies; the first success wins.
pub struct StrategyChain<I: Sync + ?Sized, O: Send> {
    strategies: Vec<Arc<dyn Strategy<I, O>>>,
}

impl<I: Sync + ?Sized, O: Send> Default for StrategyChain<I, O> {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }
}

impl<I: Sync + ?Sized, O: Send> fmt::Debug for StrategyChain<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| s.name()))
            .finish()
    }
}

impl<I: Sync + ?Sized, O: Send> Clone for StrategyChain<I, O> {
    fn clone(&self) -> Self {
        Self {
            strategies: self.strategies.clone(),
        }
    }
}

impl<I: Sync + ?Sized, O: Send> StrategyChain<I, O> {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a strategy.
    #[must_use]
    pub fn then(mut self, strategy: Arc<dyn Strategy<I, O>>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Number of strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Runs strategies in order until one succeeds.
    ///
    /// # Errors
    /// [`StrategyError::Exhausted`] with every failure when none succeeds.
    pub async fn run(&self, input: &I) -> Result<Resolved<O>, StrategyError> {
        let mut skipped = Vec::new();
        for strategy in &self.strategies {
            match strategy.run(input).await {
                Ok(output) => {
                    debug!(strategy = strategy.name(), "strategy resolved");
                    return Ok(Resolved {
                        strategy: strategy.name(),
                        output,
                        skipped,
                    });
                }
                Err(err) => {
                    warn!(
                        strategy = strategy.name(),
                        error = %err,
                        "strategy failed, falling back"
                    );
                    skipped.push(format!("{}: {err}", strategy.name()));
                }
            }
        }
        Err(StrategyError::Exhausted(skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fails;
    struct Doubles;

    #[async_trait]
    impl Strategy<u32, u32> for Fails {
        fn name(&self) -> &'static str {
            "model"
        }

        async fn run(&self, _input: &u32) -> Result<u32, StrategyError> {
            Err(StrategyError::Unavailable("offline".into()))
        }
    }

    #[async_trait]
    impl Strategy<u32, u32> for Doubles {
        fn name(&self) -> &'static str {
            "rules"
        }

        async fn run(&self, input: &u32) -> Result<u32, StrategyError> {
            Ok(input * 2)
        }
    }

    #[tokio::test]
    async fn falls_back_in_order() {
        let chain: StrategyChain<u32, u32> = StrategyChain::new()
            .then(Arc::new(Fails))
            .then(Arc::new(Doubles));
        let resolved = chain.run(&21).await.unwrap();
        assert_eq!(resolved.strategy, "rules");
        assert_eq!(resolved.output, 42);
        assert_eq!(resolved.skipped.len(), 1);
        assert!(resolved.skipped[0].contains("offline"));
    }

    #[tokio::test]
    async fn exhausted_chain_reports_every_failure() {
        let chain: StrategyChain<u32, u32> = StrategyChain::new()
            .then(Arc::new(Fails))
            .then(Arc::new(Fails));
        match chain.run(&1).await {
            Err(StrategyError::Exhausted(failures)) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
