//! Evaluation metrics for binary meta-model predictions.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Number of steps in the sparse threshold grid.
pub const THRESHOLD_STEPS: usize = 99;

/// A score computed from ground truth and predicted probabilities.
pub trait EvalMetric: Send + Sync {
    /// Score the predictions. Returns `(score, threshold)`; metrics that do
    /// not binarize report a threshold of 0.5.
    fn evaluate(&self, y_true: ArrayView1<'_, f32>, y_prob: ArrayView1<'_, f32>) -> (f64, f64);

    /// Name used in logs and artifacts.
    fn name(&self) -> &str;

    /// Whether higher is better.
    fn higher_is_better(&self) -> bool {
        true
    }
}

/// Selectable metric, as stored in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Best F2 over the sparse threshold grid.
    #[default]
    SparseGreedyF2,
    /// Area under the ROC curve.
    Auc,
    /// Binary cross-entropy.
    LogLoss,
}

impl MetricKind {
    /// Instantiate the metric.
    #[must_use]
    pub fn build(self) -> Box<dyn EvalMetric> {
        match self {
            Self::SparseGreedyF2 => Box::new(SparseGreedyF2),
            Self::Auc => Box::new(Auc),
            Self::LogLoss => Box::new(LogLoss),
        }
    }
}

/// F-beta score from hard predictions.
///
/// Returns 0 when there are no true positives.
#[must_use]
pub fn f_beta(y_true: ArrayView1<'_, f32>, y_pred: &[bool], beta: f64) -> f64 {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t > 0.5, p) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    if tp == 0 {
        return 0.0;
    }
    let precision = tp as f64 / (tp + fp) as f64;
    let recall = tp as f64 / (tp + fn_) as f64;
    let b2 = beta * beta;
    (1.0 + b2) * precision * recall / (b2 * precision + recall)
}

/// Best F2 over thresholds `0.01, 0.02, ..., 0.99`.
///
/// A sample is predicted positive when its probability is at least the
/// threshold. Returns `(f2, threshold)`; ties keep the lowest threshold.
#[must_use]
pub fn sparse_greedy_f2(y_true: ArrayView1<'_, f32>, y_prob: ArrayView1<'_, f32>) -> (f64, f64) {
    let mut best = (0.0, 0.5);
    let mut pred = vec![false; y_prob.len()];
    for step in 1..=THRESHOLD_STEPS {
        let t = step as f64 / 100.0;
        for (p, &prob) in pred.iter_mut().zip(y_prob.iter()) {
            *p = f64::from(prob) >= t;
        }
        let f2 = f_beta(y_true, &pred, 2.0);
        if f2 > best.0 {
            best = (f2, t);
        }
    }
    best
}

/// Mean binary cross-entropy, with probabilities clipped to `[1e-7, 1 - 1e-7]`.
#[must_use]
pub fn log_loss(y_true: ArrayView1<'_, f32>, y_prob: ArrayView1<'_, f32>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let eps = 1e-7;
    let total: f64 = y_true
        .iter()
        .zip(y_prob.iter())
        .map(|(&t, &p)| {
            let p = f64::from(p).clamp(eps, 1.0 - eps);
            let t = f64::from(t);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    total / y_true.len() as f64
}

/// Binary ROC AUC via the rank-sum statistic with averaged tie ranks.
///
/// Returns 0.5 when either class is absent.
#[must_use]
pub fn roc_auc(y_true: ArrayView1<'_, f32>, y_prob: ArrayView1<'_, f32>) -> f64 {
    let n = y_true.len();
    let n_pos = y_true.iter().filter(|&&t| t > 0.5).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| y_prob[a].total_cmp(&y_prob[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j < n && y_prob[order[j]] == y_prob[order[i]] {
            j += 1;
        }
        // ranks i+1 ..= j share their average
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        rank_sum += avg_rank * order[i..j].iter().filter(|&&k| y_true[k] > 0.5).count() as f64;
        i = j;
    }

    let n_pos = n_pos as f64;
    ((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)).clamp(0.0, 1.0)
}

/// [`sparse_greedy_f2`] as an [`EvalMetric`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseGreedyF2;

impl EvalMetric for SparseGreedyF2 {
    fn evaluate(&self, y_true: ArrayView1<'_, f32>, y_prob: ArrayView1<'_, f32>) -> (f64, f64) {
        sparse_greedy_f2(y_true, y_prob)
    }

    fn name(&self) -> &str {
        "sparse_greedy_f2"
    }
}

/// [`roc_auc`] as an [`EvalMetric`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Auc;

impl EvalMetric for Auc {
    fn evaluate(&self, y_true: ArrayView1<'_, f32>, y_prob: ArrayView1<'_, f32>) -> (f64, f64) {
        (roc_auc(y_true, y_prob), 0.5)
    }

    fn name(&self) -> &str {
        "auc"
    }
}

/// [`log_loss`] as an [`EvalMetric`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLoss;

impl EvalMetric for LogLoss {
    fn evaluate(&self, y_true: ArrayView1<'_, f32>, y_prob: ArrayView1<'_, f32>) -> (f64, f64) {
        (log_loss(y_true, y_prob), 0.5)
    }

    fn name(&self) -> &str {
        "logloss"
    }

    fn higher_is_better(&self) -> bool {
        false
    }
}

/// Whether `a` beats `b` under `metric`.
pub(crate) fn improves(metric: &dyn EvalMetric, a: f64, b: f64) -> bool {
    if metric.higher_is_better() {
        a > b
    } else {
        a < b
    }
}

/// Worst possible score under `metric`.
pub(crate) fn worst(metric: &dyn EvalMetric) -> f64 {
    if metric.higher_is_better() {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    }
}
