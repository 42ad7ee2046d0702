//! Class up-sampling for a single binary label.

use std::path::{Path, PathBuf};

use rand::prelude::*;

use crate::error::{DataError, Result};
use crate::labels::labels_for;
use imgstack_core::Seed;

/// Up-samples the minority class of one label position.
///
/// # Example
///
/// ```rust,ignore
/// use imgstack_data::ClassBalancer;
/// use imgstack_core::Seed;
///
/// let balanced = ClassBalancer::new(Seed::new(42)).balance(&files, &[3])?;
/// ```
#[derive(Debug, Clone)]
pub struct ClassBalancer {
    seed: Seed,
}

impl ClassBalancer {
    /// Create a balancer with a seed.
    #[must_use]
    pub fn new(seed: Seed) -> Self {
        Self { seed }
    }

    /// Create a balancer with an entropy-based seed.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::new(Seed::from_entropy())
    }

    /// Balance `files` at the single label position in `positions`.
    pub fn balance(&self, files: &[PathBuf], positions: &[usize]) -> Result<Vec<PathBuf>> {
        balance(files, positions, &mut self.seed.to_rng())
    }
}

/// Count `(negatives, positives)` at a label position.
pub fn class_counts(files: &[PathBuf], position: usize) -> Result<(usize, usize)> {
    let mut counts = (0, 0);
    for file in files {
        if label_at(file, position)? {
            counts.1 += 1;
        } else {
            counts.0 += 1;
        }
    }
    Ok(counts)
}

/// Repeat minority-class files until both classes have the same count.
///
/// With `max` and `min` the class counts, the minority list is tiled
/// `max / min` times and `max % min` more minority files are drawn uniformly
/// with replacement. The majority files and the up-sampled minority files are
/// shuffled together. Already balanced input is returned unchanged.
///
/// # Errors
///
/// - [`DataError::Value`] unless exactly one label position is given.
/// - [`DataError::Imbalance`] if either class has no file.
pub fn balance<R: Rng + ?Sized>(
    files: &[PathBuf],
    positions: &[usize],
    rng: &mut R,
) -> Result<Vec<PathBuf>> {
    let &[position] = positions else {
        return Err(DataError::Value(format!(
            "up-sampling needs exactly one label position, got {}",
            positions.len()
        )));
    };

    let mut positive = Vec::new();
    let mut negative = Vec::new();
    for file in files {
        if label_at(file, position)? {
            positive.push(file.clone());
        } else {
            negative.push(file.clone());
        }
    }

    if positive.is_empty() || negative.is_empty() {
        return Err(DataError::Imbalance(format!(
            "label {position} has {} positive and {} negative files",
            positive.len(),
            negative.len()
        )));
    }

    if positive.len() == negative.len() {
        return Ok(files.to_vec());
    }

    let (mut out, minority) = if positive.len() > negative.len() {
        (positive, negative)
    } else {
        (negative, positive)
    };
    let n = out.len() / minority.len();
    let m = out.len() % minority.len();

    tracing::info!(
        position,
        majority = out.len(),
        minority = minority.len(),
        repeat = n,
        extra = m,
        "up-sampling minority class"
    );

    out.reserve(n * minority.len() + m);
    for _ in 0..n {
        out.extend(minority.iter().cloned());
    }
    for _ in 0..m {
        if let Some(file) = minority.choose(rng) {
            out.push(file.clone());
        }
    }
    out.shuffle(rng);

    let (neg, pos) = class_counts(&out, position)?;
    if neg != pos {
        return Err(DataError::Imbalance(format!(
            "up-sampling left {pos} positive and {neg} negative files"
        )));
    }
    Ok(out)
}

fn label_at(file: &Path, position: usize) -> Result<bool> {
    let labels = labels_for(file)?;
    labels.get(position).map(|&v| v != 0).ok_or_else(|| {
        DataError::Shape(format!(
            "{} has {} labels, position {position} requested",
            file.display(),
            labels.len()
        ))
    })
}
