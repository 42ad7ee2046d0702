//! Image directory listing and ratio splits.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{DataError, Result};

/// File extensions recognized as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "bmp", "png", "ppm"];

/// Whether a bare file name looks like a labeled image: word characters,
/// one dot, and a known image extension.
#[must_use]
pub fn is_image_name(name: &str) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && stem.chars().all(|c| c.is_alphanumeric() || c == '_')
        && IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Recursively list the paths of all images below `dir`, sorted.
pub fn list_image_paths(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(dir.as_ref(), &mut out)?;
    out.sort();
    Ok(out)
}

/// Recursively list the bare file names of all images below `dir`, sorted.
pub fn list_image_names(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    Ok(list_image_paths(dir)?
        .into_iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
        .collect())
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_image_name)
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Read the labels of the images in `dir` without decoding any pixels.
///
/// Names are shuffled and optionally truncated to `limit` before parsing.
/// Returns the label array and the matching names.
pub fn load_labels<R: Rng + ?Sized>(
    dir: impl AsRef<Path>,
    limit: Option<usize>,
    rng: &mut R,
) -> Result<(Array2<i32>, Vec<String>)> {
    let mut names = list_image_names(dir)?;
    names.shuffle(rng);
    if let Some(limit) = limit {
        names.truncate(limit);
    }
    let labels = crate::labels::label_matrix(&names, None)?;
    Ok((labels, names))
}

/// Split `n` items into consecutive ranges by ratio.
///
/// Ratios must sum to one. Boundaries are `floor(n * cumulative_ratio)`, so
/// the last range always ends at `n`.
///
/// ```rust
/// use imgstack_data::divide_ranges;
///
/// let parts = divide_ranges(10, &[0.8, 0.1, 0.1]).unwrap();
/// assert_eq!(parts, vec![0..8, 8..9, 9..10]);
/// ```
pub fn divide_ranges(n: usize, ratios: &[f64]) -> Result<Vec<std::ops::Range<usize>>> {
    let total: f64 = ratios.iter().sum();
    if ratios.is_empty() || (total - 1.0).abs() > 1e-9 {
        return Err(DataError::Value(format!(
            "ratios must sum to 1, got {total}"
        )));
    }

    let mut ranges = Vec::with_capacity(ratios.len());
    let mut cumulative = 0.0;
    let mut start = 0;
    for (i, ratio) in ratios.iter().enumerate() {
        cumulative += ratio;
        let end = if i + 1 == ratios.len() {
            n
        } else {
            ((n as f64 * cumulative).floor() as usize).min(n)
        };
        ranges.push(start..end);
        start = end;
    }
    Ok(ranges)
}
