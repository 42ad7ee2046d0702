//! Per-run bookkeeping passed explicitly through the pipeline.

use serde::{Deserialize, Serialize};

use crate::seed::Seed;

/// State owned by one training run.
///
/// Counts how many training and validation pipelines the run has built so far
/// and carries the master seed every pipeline derives its own seed from.
/// A new context is created per run and dropped with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    seed: Option<Seed>,
    training_times: usize,
    validation_times: usize,
}

impl RunContext {
    /// Create an empty context. Pipelines draw entropy-based seeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context whose pipelines are reproducible.
    #[must_use]
    pub fn with_seed(seed: Seed) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Master seed, if any.
    #[must_use]
    pub fn seed(&self) -> Option<Seed> {
        self.seed
    }

    /// Number of training pipelines built.
    #[must_use]
    pub fn training_times(&self) -> usize {
        self.training_times
    }

    /// Number of validation pipelines built.
    #[must_use]
    pub fn validation_times(&self) -> usize {
        self.validation_times
    }

    /// Count a new training pipeline and return the seed it should use.
    pub fn next_training(&mut self) -> Seed {
        self.training_times += 1;
        tracing::debug!(times = self.training_times, "building training pipeline");
        self.pipeline_seed("train", self.training_times)
    }

    /// Count a new validation pipeline and return the seed it should use.
    pub fn next_validation(&mut self) -> Seed {
        self.validation_times += 1;
        tracing::debug!(times = self.validation_times, "building validation pipeline");
        self.pipeline_seed("valid", self.validation_times)
    }

    fn pipeline_seed(&self, kind: &str, n: usize) -> Seed {
        match self.seed {
            Some(seed) => seed.derive(&format!("{kind}-{n}")),
            None => Seed::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_context() {
        let mut a = RunContext::new();
        let b = RunContext::new();
        a.next_training();
        a.next_training();
        a.next_validation();

        assert_eq!(a.training_times(), 2);
        assert_eq!(a.validation_times(), 1);
        assert_eq!(b.training_times(), 0);
    }

    #[test]
    fn test_seeded_context_is_reproducible() {
        let mut a = RunContext::with_seed(Seed::new(9));
        let mut b = RunContext::with_seed(Seed::new(9));
        assert_eq!(a.next_training(), b.next_training());
        assert_ne!(a.next_training(), a.next_validation());
    }
}
