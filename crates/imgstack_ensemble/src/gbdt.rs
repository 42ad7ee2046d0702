//! Gradient-boosted regression trees with a logistic objective.
//!
//! Each round fits one depth-limited tree to the first and second derivatives
//! of the log loss and adds its (shrunken) Newton leaf weights to the margin.
//! Splits are exact: every distinct feature value is a candidate.
//!
//! This is a minimal meta-model for the stacker, sized for a few dozen
//! prediction columns. It is not a general gradient-boosting library: no
//! histogram splits, sampling, missing-value handling or multi-class
//! objectives.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, Result};

/// L2 penalty on leaf weights.
const LAMBDA: f64 = 1.0;

/// Booster hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    /// Shrinkage applied to every leaf weight.
    pub eta: f64,
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Minimum hessian sum in each child of a split.
    pub min_child_weight: f64,
    /// Number of boosting rounds.
    pub n_rounds: usize,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            eta: 0.05,
            max_depth: 6,
            min_child_weight: 1.0,
            n_rounds: 1000,
        }
    }
}

impl BoosterParams {
    /// Set the number of rounds.
    #[must_use]
    pub fn with_rounds(mut self, n_rounds: usize) -> Self {
        self.n_rounds = n_rounds;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.eta > 0.0 && self.eta <= 1.0) {
            return Err(EnsembleError::Search(format!("eta must be in (0, 1], got {}", self.eta)));
        }
        if self.min_child_weight < 0.0 {
            return Err(EnsembleError::Search(format!(
                "min_child_weight must be non-negative, got {}",
                self.min_child_weight
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

/// One regression tree stored as a flat node list; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: ArrayView1<'_, f32>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[feature] < threshold { left } else { right };
                }
            }
        }
    }

    /// Number of leaves.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f32>,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoosterParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    gain: f64,
    feature: usize,
    threshold: f32,
}

impl TreeBuilder<'_> {
    fn build(mut self, rows: Vec<usize>) -> Tree {
        self.grow(rows, 0);
        Tree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: -g / (h + LAMBDA) * self.params.eta,
        });

        if depth >= self.params.max_depth {
            return id;
        }
        let Some(best) = self.best_split(&rows, g, h) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.x[[i, best.feature]] < best.threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<BestSplit> {
        let parent = g * g / (h + LAMBDA);
        let mcw = self.params.min_child_weight;
        let mut best: Option<BestSplit> = None;
        let mut order = rows.to_vec();

        for feature in 0..self.x.ncols() {
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let (mut gl, mut hl) = (0.0, 0.0);
            for pair in order.windows(2) {
                let (i, next) = (pair[0], pair[1]);
                gl += self.grad[i];
                hl += self.hess[i];

                let (v, v_next) = (self.x[[i, feature]], self.x[[next, feature]]);
                if v == v_next {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < mcw || hr < mcw {
                    continue;
                }

                let gain = 0.5 * (gl * gl / (hl + LAMBDA) + gr * gr / (hr + LAMBDA) - parent);
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        gain,
                        feature,
                        threshold: v + (v_next - v) / 2.0,
                    });
                }
            }
        }
        best
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// A trained logistic booster.
///
/// # Example
///
/// ```rust
/// use imgstack_ensemble::{Booster, BoosterParams};
/// use ndarray::array;
///
/// let x = array![[0.1f32], [0.2], [0.8], [0.9]];
/// let y = array![0.0f32, 0.0, 1.0, 1.0];
/// let params = BoosterParams { n_rounds: 50, max_depth: 2, eta: 0.3, min_child_weight: 0.0 };
/// let model = Booster::fit(x.view(), y.view(), params).unwrap();
/// let p = model.predict_proba(x.view()).unwrap();
/// assert!(p[0] < 0.5 && p[3] > 0.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    params: BoosterParams,
    n_features: usize,
    trees: Vec<Tree>,
}

impl Booster {
    /// Fit on rows `x` with 0/1 targets `y`.
    ///
    /// # Errors
    ///
    /// Returns an error for mismatched row counts, empty input, or invalid
    /// parameters.
    pub fn fit(x: ArrayView2<'_, f32>, y: ArrayView1<'_, f32>, params: BoosterParams) -> Result<Self> {
        Self::fit_with_eval(x, y, None, params, None)
    }

    /// Fit with an optional evaluation set and early stopping.
    ///
    /// With `early_stopping` set to `Some(k)`, training stops once the
    /// evaluation log loss has not improved for `k` rounds and the model is
    /// truncated to its best round.
    pub fn fit_with_eval(
        x: ArrayView2<'_, f32>,
        y: ArrayView1<'_, f32>,
        eval: Option<(ArrayView2<'_, f32>, ArrayView1<'_, f32>)>,
        params: BoosterParams,
        early_stopping: Option<usize>,
    ) -> Result<Self> {
        params.validate()?;
        let (n, n_features) = x.dim();
        if n == 0 {
            return Err(EnsembleError::Data("cannot fit a booster on zero rows".to_string()));
        }
        if y.len() != n {
            return Err(EnsembleError::shape(format!("{n} targets"), format!("{} targets", y.len())));
        }
        if let Some((ex, ey)) = eval {
            if ex.ncols() != n_features || ex.nrows() != ey.len() {
                return Err(EnsembleError::shape(
                    format!("(M, {n_features}) eval rows with M targets"),
                    format!("{:?} with {} targets", ex.dim(), ey.len()),
                ));
            }
        }

        let mut margin = vec![0.0f64; n];
        let mut eval_margin = eval.map(|(ex, _)| vec![0.0f64; ex.nrows()]);
        let mut grad = vec![0.0f64; n];
        let mut hess = vec![0.0f64; n];
        let mut trees = Vec::with_capacity(params.n_rounds);
        let (mut best_loss, mut best_round) = (f64::INFINITY, 0usize);

        for round in 0..params.n_rounds {
            for i in 0..n {
                let p = sigmoid(margin[i]);
                grad[i] = p - f64::from(y[i]);
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }
            let tree = TreeBuilder {
                x: x.view(),
                grad: &grad,
                hess: &hess,
                params: &params,
                nodes: Vec::new(),
            }
            .build((0..n).collect());

            for (i, m) in margin.iter_mut().enumerate() {
                *m += tree.predict_row(x.row(i));
            }

            if let (Some((ex, ey)), Some(em)) = (eval, eval_margin.as_mut()) {
                let mut loss = 0.0;
                for (i, m) in em.iter_mut().enumerate() {
                    *m += tree.predict_row(ex.row(i));
                    let p = sigmoid(*m).clamp(1e-7, 1.0 - 1e-7);
                    let t = f64::from(ey[i]);
                    loss -= t * p.ln() + (1.0 - t) * (1.0 - p).ln();
                }
                if loss < best_loss {
                    best_loss = loss;
                    best_round = round;
                }
                trees.push(tree);
                if early_stopping.is_some_and(|k| round - best_round >= k) {
                    trees.truncate(best_round + 1);
                    tracing::debug!(best_round, "early stopping");
                    break;
                }
            } else {
                trees.push(tree);
            }
        }

        Ok(Self {
            params,
            n_features,
            trees,
        })
    }

    /// Raw margins (log-odds).
    ///
    /// # Errors
    ///
    /// Returns an error if `x` has the wrong number of columns.
    pub fn predict_margin(&self, x: ArrayView2<'_, f32>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(EnsembleError::shape(
                format!("{} features", self.n_features),
                format!("{} features", x.ncols()),
            ));
        }
        Ok(x
            .rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum())
            .collect())
    }

    /// Positive-class probabilities.
    pub fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        Ok(self.predict_margin(x)?.mapv(|m| sigmoid(m) as f32))
    }

    /// Trees kept after training.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Number of input columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Parameters used for training.
    #[must_use]
    pub fn params(&self) -> &BoosterParams {
        &self.params
    }

    /// Trees in boosting order.
    #[must_use]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }
}
