//! Correlation-based pruning of candidate features.

use ndarray::ArrayView1;

/// Pearson correlation of two equally long vectors.
///
/// Returns 0 when either vector is constant.
#[must_use]
pub fn pearson(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let mean = |v: &ArrayView1<'_, f32>| v.iter().take(n).map(|&x| f64::from(x)).sum::<f64>() / n as f64;
    let (ma, mb) = (mean(&a), mean(&b));

    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (f64::from(x) - ma, f64::from(y) - mb);
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }
    if va == 0.0 || vb == 0.0 {
        return 0.0;
    }
    cov / (va.sqrt() * vb.sqrt())
}

/// Keep features, best first, whose absolute correlation with every already
/// kept feature is at most `threshold`.
///
/// `ranked` lists candidate indices best first; `column` returns the values of
/// a candidate. The result preserves rank order.
pub fn correlation_prune<'a, F>(ranked: &[usize], threshold: f64, column: F) -> Vec<usize>
where
    F: Fn(usize) -> ArrayView1<'a, f32>,
{
    let mut kept: Vec<usize> = Vec::new();
    for &candidate in ranked {
        let values = column(candidate);
        let redundant = kept
            .iter()
            .any(|&k| pearson(values.view(), column(k)).abs() > threshold);
        if redundant {
            tracing::debug!(candidate, "pruned correlated feature");
        } else {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2, Axis};

    #[test]
    fn test_pearson() {
        let a = array![1.0f32, 2.0, 3.0, 4.0];
        assert_relative_eq!(pearson(a.view(), a.view()), 1.0, epsilon = 1e-12);
        let b = array![4.0f32, 3.0, 2.0, 1.0];
        assert_relative_eq!(pearson(a.view(), b.view()), -1.0, epsilon = 1e-12);
        let c = array![1.0f32, 1.0, 1.0, 1.0];
        assert_eq!(pearson(a.view(), c.view()), 0.0);
    }

    #[test]
    fn test_prune_keeps_rank_order() {
        // column 1 is a scaled copy of column 0, column 2 is unrelated
        let x: Array2<f32> = array![
            [0.1, 0.2, 0.9],
            [0.4, 0.8, 0.1],
            [0.2, 0.4, 0.5],
            [0.9, 1.8, 0.3]
        ];
        let kept = correlation_prune(&[1, 0, 2], 0.9, |j| x.index_axis(Axis(1), j));
        assert_eq!(kept, vec![1, 2]);

        let strict = correlation_prune(&[0, 1, 2], 0.0, |j| x.index_axis(Axis(1), j));
        assert_eq!(strict, vec![0]);
    }
}
