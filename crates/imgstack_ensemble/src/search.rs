//! Hyperparameter search over booster parameters.
//!
//! This module provides:
//! - [`ParamSpace`], the lists of values tried for each parameter
//! - [`ParamSearch`], exhaustive or random search over that space
//! - [`SearchResult`] holding every trial and the best one
//!
//! # Example
//!
//! ```rust
//! use imgstack_core::Seed;
//! use imgstack_ensemble::{ParamSearch, ParamSpace};
//!
//! let space = ParamSpace::default();
//! assert_eq!(space.grid_size(), 45);
//!
//! let search = ParamSearch::random(space, 20, Seed::new(42));
//! let result = search
//!     .run(|params| Ok((params.max_depth as f64, 0.5)))
//!     .unwrap();
//! assert_eq!(result.trials.len(), 20);
//! assert!(result.best.score <= 10.0);
//! ```

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, Result};
use crate::gbdt::BoosterParams;
use imgstack_core::Seed;

/// Values tried for each booster parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSpace {
    /// Learning rates.
    pub eta: Vec<f64>,
    /// Tree depths.
    pub max_depth: Vec<usize>,
    /// Minimum child hessian sums.
    pub min_child_weight: Vec<f64>,
}

impl Default for ParamSpace {
    fn default() -> Self {
        Self {
            eta: vec![0.05],
            max_depth: (2..=10).collect(),
            min_child_weight: vec![1.0, 2.0, 3.0, 4.0, 5.0],
        }
    }
}

impl ParamSpace {
    /// Number of combinations.
    #[must_use]
    pub fn grid_size(&self) -> usize {
        self.eta.len() * self.max_depth.len() * self.min_child_weight.len()
    }

    /// Whether any parameter has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grid_size() == 0
    }

    /// Every combination, with `n_rounds` boosting rounds.
    #[must_use]
    pub fn grid(&self, n_rounds: usize) -> Vec<BoosterParams> {
        let mut out = Vec::with_capacity(self.grid_size());
        for &eta in &self.eta {
            for &max_depth in &self.max_depth {
                for &min_child_weight in &self.min_child_weight {
                    out.push(BoosterParams {
                        eta,
                        max_depth,
                        min_child_weight,
                        n_rounds,
                    });
                }
            }
        }
        out
    }
}

/// How candidates are drawn from the space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategy {
    /// Try every combination.
    Grid,
    /// Try `trials` distinct combinations drawn without replacement.
    Random {
        /// Number of trials.
        trials: usize,
        /// Sampling seed.
        seed: Seed,
    },
}

/// One evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Parameters tried.
    pub params: BoosterParams,
    /// Cross-validated score.
    pub score: f64,
    /// Decision threshold reported by the metric.
    pub threshold: f64,
}

/// Outcome of a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Best trial.
    pub best: Trial,
    /// All trials in evaluation order.
    pub trials: Vec<Trial>,
}

impl SearchResult {
    /// The `n` best trials, best first.
    #[must_use]
    pub fn top_n(&self, n: usize, higher_is_better: bool) -> Vec<&Trial> {
        let mut sorted: Vec<&Trial> = self.trials.iter().collect();
        sorted.sort_by(|a, b| {
            let ord = a.score.total_cmp(&b.score);
            if higher_is_better {
                ord.reverse()
            } else {
                ord
            }
        });
        sorted.truncate(n);
        sorted
    }
}

/// Grid or random search over a [`ParamSpace`].
#[derive(Debug, Clone)]
pub struct ParamSearch {
    space: ParamSpace,
    strategy: SearchStrategy,
    n_rounds: usize,
    maximize: bool,
}

impl ParamSearch {
    /// Exhaustive search.
    #[must_use]
    pub fn grid(space: ParamSpace) -> Self {
        Self {
            space,
            strategy: SearchStrategy::Grid,
            n_rounds: BoosterParams::default().n_rounds,
            maximize: true,
        }
    }

    /// Random search with `trials` candidates. `trials == 0` or a value at
    /// least the grid size falls back to the full grid.
    #[must_use]
    pub fn random(space: ParamSpace, trials: usize, seed: Seed) -> Self {
        Self {
            strategy: SearchStrategy::Random { trials, seed },
            ..Self::grid(space)
        }
    }

    /// Set the boosting rounds of every candidate.
    #[must_use]
    pub fn n_rounds(mut self, n_rounds: usize) -> Self {
        self.n_rounds = n_rounds;
        self
    }

    /// Set whether higher scores are better.
    #[must_use]
    pub fn maximize(mut self, maximize: bool) -> Self {
        self.maximize = maximize;
        self
    }

    /// The candidates this search will evaluate, in order.
    #[must_use]
    pub fn candidates(&self) -> Vec<BoosterParams> {
        let mut grid = self.space.grid(self.n_rounds);
        match self.strategy {
            SearchStrategy::Grid => grid,
            SearchStrategy::Random { trials, seed } => {
                if trials == 0 || trials >= grid.len() {
                    return grid;
                }
                let mut rng = seed.to_rng();
                let (picked, _) = grid.partial_shuffle(&mut rng, trials);
                picked.to_vec()
            }
        }
    }

    /// Evaluate every candidate with `objective`, which returns
    /// `(score, threshold)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the space is empty or the objective fails.
    pub fn run<F>(&self, mut objective: F) -> Result<SearchResult>
    where
        F: FnMut(&BoosterParams) -> Result<(f64, f64)>,
    {
        if self.space.is_empty() {
            return Err(EnsembleError::Search("parameter space is empty".to_string()));
        }

        let mut trials = Vec::new();
        let mut best: Option<Trial> = None;
        for params in self.candidates() {
            let (score, threshold) = objective(&params)?;
            let trial = Trial {
                params,
                score,
                threshold,
            };
            let better = best.as_ref().map_or(true, |b| {
                if self.maximize {
                    score > b.score
                } else {
                    score < b.score
                }
            });
            if better {
                best = Some(trial.clone());
            }
            tracing::trace!(
                eta = params.eta,
                max_depth = params.max_depth,
                min_child_weight = params.min_child_weight,
                score,
                "search trial"
            );
            trials.push(trial);
        }

        let best = best.ok_or_else(|| EnsembleError::Search("no candidates evaluated".to_string()))?;
        Ok(SearchResult { best, trials })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_space() {
        let space = ParamSpace::default();
        assert_eq!(space.grid_size(), 45);
        let grid = space.grid(100);
        assert_eq!(grid.len(), 45);
        assert!(grid.iter().all(|p| p.n_rounds == 100 && p.eta == 0.05));
        assert_eq!(grid[0].max_depth, 2);
        assert_eq!(grid[44].max_depth, 10);
    }

    #[test]
    fn test_random_candidates_distinct_and_seeded() {
        let a = ParamSearch::random(ParamSpace::default(), 20, Seed::new(1)).candidates();
        let b = ParamSearch::random(ParamSpace::default(), 20, Seed::new(1)).candidates();
        assert_eq!(a, b);
        let distinct: HashSet<(usize, u64)> = a
            .iter()
            .map(|p| (p.max_depth, p.min_child_weight.to_bits()))
            .collect();
        assert_eq!(distinct.len(), 20);
    }

    #[test]
    fn test_random_falls_back_to_grid() {
        let space = ParamSpace {
            eta: vec![0.1],
            max_depth: vec![2, 3],
            min_child_weight: vec![1.0],
        };
        assert_eq!(ParamSearch::random(space.clone(), 0, Seed::new(0)).candidates().len(), 2);
        assert_eq!(ParamSearch::random(space, 9, Seed::new(0)).candidates().len(), 2);
    }

    #[test]
    fn test_run_picks_best() {
        let search = ParamSearch::grid(ParamSpace::default()).n_rounds(10);
        let result = search
            .run(|p| Ok((-(p.max_depth as f64 - 4.0).abs() - p.min_child_weight, 0.3)))
            .unwrap();
        assert_eq!(result.best.params.max_depth, 4);
        assert_eq!(result.best.params.min_child_weight, 1.0);
        assert_eq!(result.top_n(3, true)[0], &result.best);
    }

    #[test]
    fn test_run_minimize() {
        let search = ParamSearch::grid(ParamSpace::default()).maximize(false);
        let result = search.run(|p| Ok((p.max_depth as f64, 0.5))).unwrap();
        assert_eq!(result.best.params.max_depth, 2);
    }

    #[test]
    fn test_empty_space() {
        let space = ParamSpace {
            eta: vec![],
            ..Default::default()
        };
        let err = ParamSearch::grid(space).run(|_| Ok((0.0, 0.5))).unwrap_err();
        assert!(matches!(err, EnsembleError::Search(_)));
    }
}
