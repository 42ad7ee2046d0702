//! Label extraction from file names.
//!
//! Training images carry their multi-label vector in the file name:
//! `<prefix>_<l1>_<l2>..._<lk>.<ext>`. The prefix is an opaque identifier and
//! is discarded; every other underscore-separated token is an integer label.

use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::error::{DataError, Result};

/// Parse the label vector encoded in a file name.
///
/// Only the final path component is inspected, so directory names may contain
/// underscores and dots freely.
///
/// # Errors
///
/// Returns [`DataError::Format`] if the name has no extension or any label
/// token is not an integer.
///
/// # Example
///
/// ```rust
/// use imgstack_data::labels_for;
///
/// assert_eq!(labels_for("train/img42_1_0_1.jpg").unwrap(), vec![1, 0, 1]);
/// assert!(labels_for("img42_1_x.jpg").is_err());
/// ```
pub fn labels_for(path: impl AsRef<Path>) -> Result<Vec<i32>> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DataError::Format(format!("no file name in {}", path.display())))?;
    let (stem, _ext) = name
        .rsplit_once('.')
        .ok_or_else(|| DataError::Format(format!("missing extension in '{name}'")))?;

    stem.split('_')
        .skip(1)
        .map(|token| {
            token.parse::<i32>().map_err(|_| {
                DataError::Format(format!("non-numeric label '{token}' in '{name}'"))
            })
        })
        .collect()
}

/// Parse the label vectors of many files.
pub fn labels_for_all<P: AsRef<Path>>(files: &[P]) -> Result<Vec<Vec<i32>>> {
    files.iter().map(labels_for).collect()
}

/// Build the fixed-width label array of a file list.
///
/// With `positions` set, only those label columns are kept, in the given
/// order.
///
/// # Errors
///
/// Returns [`DataError::Shape`] if the files do not all encode the same number
/// of labels or a position is out of range, and [`DataError::Format`] for
/// unparsable names.
pub fn label_matrix<P: AsRef<Path>>(files: &[P], positions: Option<&[usize]>) -> Result<Array2<i32>> {
    let rows = labels_for_all(files)?;
    let width = rows.first().map_or(0, Vec::len);

    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(DataError::Shape(format!(
            "{} has {} labels, expected {}",
            files[i].as_ref().display(),
            row.len(),
            width
        )));
    }

    let columns: Vec<usize> = match positions {
        Some(p) => {
            if let Some(&bad) = p.iter().find(|&&c| c >= width) {
                return Err(DataError::Shape(format!(
                    "label position {bad} out of range for width {width}"
                )));
            }
            p.to_vec()
        }
        None => (0..width).collect(),
    };

    Ok(Array2::from_shape_fn((rows.len(), columns.len()), |(r, c)| {
        rows[r][columns[c]]
    }))
}

/// Remove a leading `<kind>_` token naming the data source.
///
/// Returns `None` if the name does not start with one of `kinds`.
///
/// ```rust
/// use imgstack_data::strip_kind_prefix;
///
/// let kinds = ["augmented", "original"];
/// assert_eq!(strip_kind_prefix("augmented_a1_0_1.jpg", &kinds).as_deref(), Some("a1_0_1.jpg"));
/// assert_eq!(strip_kind_prefix("a1_0_1.jpg", &kinds), None);
/// ```
#[must_use]
pub fn strip_kind_prefix<S: AsRef<str>>(name: &str, kinds: &[S]) -> Option<String> {
    let (head, rest) = name.split_once('_')?;
    kinds
        .iter()
        .any(|k| k.as_ref() == head)
        .then(|| rest.to_string())
}

/// Rename every image in `dir` whose name starts with a source-kind prefix.
///
/// Returns the new paths.
pub fn rename_strip_kind_prefix<S: AsRef<str>>(dir: impl AsRef<Path>, kinds: &[S]) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut renamed = Vec::new();
    for name in crate::files::list_image_names(dir)? {
        if let Some(target) = strip_kind_prefix(&name, kinds) {
            let to = dir.join(&target);
            std::fs::rename(dir.join(&name), &to)?;
            renamed.push(to);
        }
    }
    tracing::info!(dir = %dir.display(), count = renamed.len(), "stripped source-kind prefixes");
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_for_basic() {
        assert_eq!(labels_for("abc_0_1_1_0.png").unwrap(), vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_labels_for_ignores_directories() {
        let labels = labels_for("/data/set_v1.2/raw_images/x9_1_0.jpg").unwrap();
        assert_eq!(labels, vec![1, 0]);
    }

    #[test]
    fn test_labels_for_uses_final_extension() {
        let err = labels_for("id_1_1.tar.png").unwrap_err();
        assert!(err.to_string().contains("1.tar"));
    }

    #[test]
    fn test_labels_for_rejects_non_numeric() {
        let err = labels_for("id_1_yes.jpg").unwrap_err();
        assert!(matches!(err, DataError::Format(_)));
    }

    #[test]
    fn test_labels_for_rejects_missing_extension() {
        assert!(matches!(labels_for("id_1_0").unwrap_err(), DataError::Format(_)));
    }

    #[test]
    fn test_label_width_is_constant() {
        let files = ["a_1_0_0.jpg", "b_0_1_1.jpg", "c_1_1_1.jpg"];
        for f in files {
            assert_eq!(labels_for(f).unwrap().len(), 3);
        }
    }

    #[test]
    fn test_label_matrix_positions() {
        let files = ["a_1_0_0.jpg", "b_0_1_1.jpg"];
        let m = label_matrix(&files, Some(&[2, 0])).unwrap();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m.row(0).to_vec(), vec![0, 1]);
        assert_eq!(m.row(1).to_vec(), vec![1, 0]);
    }

    #[test]
    fn test_label_matrix_rejects_ragged() {
        let files = ["a_1_0.jpg", "b_0_1_1.jpg"];
        assert!(matches!(label_matrix(&files, None).unwrap_err(), DataError::Shape(_)));
    }

    #[test]
    fn test_label_matrix_rejects_bad_position() {
        let files = ["a_1_0.jpg"];
        assert!(matches!(label_matrix(&files, Some(&[5])).unwrap_err(), DataError::Shape(_)));
    }

    #[test]
    fn test_rename_strip_kind_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("augmented_a_1_0.jpg"), b"").unwrap();
        std::fs::write(dir.path().join("b_0_1.jpg"), b"").unwrap();

        let renamed = rename_strip_kind_prefix(dir.path(), &["augmented"]).unwrap();
        assert_eq!(renamed, vec![dir.path().join("a_1_0.jpg")]);
        assert!(dir.path().join("a_1_0.jpg").exists());
        assert!(dir.path().join("b_0_1.jpg").exists());
    }
}
