//! K-fold split management.
//!
//! Fold assignments are persisted as a plain text table with one
//! `<fold_id>,<filename>` record per line. Every file of the training corpus
//! appears in exactly one fold. Holding out one fold yields a train/validation
//! pair of file lists.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};
use imgstack_core::Seed;

/// A fold assignment: filenames with their fold ids, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldTable {
    entries: Vec<(usize, String)>,
}

impl FoldTable {
    /// Build a table from `(fold, filename)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Format`] if a filename appears twice.
    pub fn from_entries(entries: Vec<(usize, String)>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for (_, name) in &entries {
            if !seen.insert(name.as_str()) {
                return Err(DataError::Format(format!(
                    "'{name}' is assigned to more than one fold"
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Assign names to `k` folds.
    ///
    /// Names are shuffled with `seed` and dealt round-robin, so fold sizes
    /// differ by at most one.
    pub fn assign<S: AsRef<str>>(names: &[S], k: usize, seed: Seed) -> Result<Self> {
        if k < 2 {
            return Err(DataError::Value(format!("k must be at least 2, got {k}")));
        }
        let mut order: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        order.shuffle(&mut seed.to_rng());

        let entries = order
            .into_iter()
            .enumerate()
            .map(|(i, name)| (i % k, name.to_string()))
            .collect();
        Self::from_entries(entries)
    }

    /// Read a table from disk.
    ///
    /// Blank lines are skipped; surrounding whitespace on each field is
    /// trimmed.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut entries = Vec::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (fold, name) = line.split_once(',').ok_or_else(|| {
                DataError::Format(format!(
                    "{}:{}: expected '<fold>,<filename>'",
                    path.display(),
                    lineno + 1
                ))
            })?;
            let fold = fold.trim().parse::<usize>().map_err(|_| {
                DataError::Format(format!(
                    "{}:{}: fold id '{}' is not an integer",
                    path.display(),
                    lineno + 1,
                    fold.trim()
                ))
            })?;
            entries.push((fold, name.trim().to_string()));
        }

        tracing::debug!(path = %path.display(), records = entries.len(), "read fold table");
        Self::from_entries(entries)
    }

    /// Write the table to disk.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(std::fs::File::create(path.as_ref())?);
        for (fold, name) in &self.entries {
            writeln!(out, "{fold},{name}")?;
        }
        out.flush()?;
        Ok(())
    }

    /// `(fold, filename)` records in table order.
    #[must_use]
    pub fn entries(&self) -> &[(usize, String)] {
        &self.entries
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of folds, i.e. the largest fold id plus one.
    #[must_use]
    pub fn n_folds(&self) -> usize {
        self.entries.iter().map(|(k, _)| k + 1).max().unwrap_or(0)
    }

    /// Fold id of a filename.
    #[must_use]
    pub fn fold_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().find(|(_, n)| n == name).map(|(k, _)| *k)
    }

    /// Filenames split into `(train, valid)` for a held-out fold, in table
    /// order.
    #[must_use]
    pub fn split_names(&self, held_out: usize) -> (Vec<&str>, Vec<&str>) {
        let mut train = Vec::new();
        let mut valid = Vec::new();
        for (fold, name) in &self.entries {
            if *fold == held_out {
                valid.push(name.as_str());
            } else {
                train.push(name.as_str());
            }
        }
        (train, valid)
    }
}

/// Train and validation file lists for one held-out fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KFoldFiles {
    /// Training files, shuffled unless disabled.
    pub train: Vec<PathBuf>,
    /// Validation files, always in table order.
    pub valid: Vec<PathBuf>,
}

/// Expands a fold table into full paths under one or more data directories.
///
/// Each data directory holds one kind of images (for example raw and
/// augmented copies) under the same filenames. Results for all directories
/// are concatenated in the order the directories were added.
///
/// Validation order is never shuffled: every model evaluated on the same fold
/// sees the validation files in the same order, so their predictions line up
/// row by row for ensembling.
///
/// # Example
///
/// ```rust,ignore
/// use imgstack_data::{FoldTable, KFoldResolver};
/// use imgstack_core::Seed;
///
/// let table = FoldTable::read("folds/5fold.txt")?;
/// let files = KFoldResolver::new(table)
///     .data_dir("data/original")
///     .data_dir("data/augmented")
///     .seed(Seed::new(42))
///     .resolve(0)?;
/// ```
#[derive(Debug, Clone)]
pub struct KFoldResolver {
    table: FoldTable,
    data_dirs: Vec<PathBuf>,
    shuffle_train: bool,
    seed: Option<Seed>,
}

impl KFoldResolver {
    /// Create a resolver over a fold table.
    #[must_use]
    pub fn new(table: FoldTable) -> Self {
        Self {
            table,
            data_dirs: Vec::new(),
            shuffle_train: true,
            seed: None,
        }
    }

    /// Add a data directory.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dirs.push(dir.into());
        self
    }

    /// Enable or disable shuffling of the training list.
    #[must_use]
    pub fn shuffle_train(mut self, shuffle: bool) -> Self {
        self.shuffle_train = shuffle;
        self
    }

    /// Set the seed used to shuffle the training list.
    #[must_use]
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The underlying table.
    #[must_use]
    pub fn table(&self) -> &FoldTable {
        &self.table
    }

    /// Resolve the file lists for `held_out`.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory was configured.
    pub fn resolve(&self, held_out: usize) -> Result<KFoldFiles> {
        if self.data_dirs.is_empty() {
            return Err(DataError::Value("no data directory configured".to_string()));
        }

        let (train_names, valid_names) = self.table.split_names(held_out);
        let expand = |names: &[&str]| -> Vec<PathBuf> {
            self.data_dirs
                .iter()
                .flat_map(|dir| names.iter().map(move |n| dir.join(n)))
                .collect()
        };

        let mut train = expand(&train_names);
        let valid = expand(&valid_names);

        if self.shuffle_train {
            let seed = self.seed.unwrap_or_else(Seed::from_entropy);
            train.shuffle(&mut seed.to_rng());
        }

        tracing::info!(
            held_out,
            train = train.len(),
            valid = valid.len(),
            dirs = self.data_dirs.len(),
            "resolved k-fold files"
        );
        Ok(KFoldFiles { train, valid })
    }
}

/// Read a fold table and resolve the file lists for `held_out`.
pub fn resolve<P: AsRef<Path>>(
    fold_table: impl AsRef<Path>,
    held_out: usize,
    data_dirs: &[P],
    shuffle_train: bool,
) -> Result<KFoldFiles> {
    let resolver = data_dirs.iter().fold(
        KFoldResolver::new(FoldTable::read(fold_table)?).shuffle_train(shuffle_train),
        |r, dir| r.data_dir(dir.as_ref()),
    );
    resolver.resolve(held_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_table(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("folds.txt");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_read_and_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(dir.path(), "0,a_1.jpg\n1,b_0.jpg\n\n0,c_1.jpg\n2,d_0.jpg\n");
        let table = FoldTable::read(&path).unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.n_folds(), 3);
        assert_eq!(table.fold_of("d_0.jpg"), Some(2));

        let (train, valid) = table.split_names(0);
        assert_eq!(valid, vec!["a_1.jpg", "c_1.jpg"]);
        assert_eq!(train, vec!["b_0.jpg", "d_0.jpg"]);
    }

    #[test]
    fn test_read_rejects_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(dir.path(), "0,a.jpg\nx,b.jpg\n");
        assert!(matches!(FoldTable::read(&path).unwrap_err(), DataError::Format(_)));

        let path = write_table(dir.path(), "0 a.jpg\n");
        assert!(matches!(FoldTable::read(&path).unwrap_err(), DataError::Format(_)));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let entries = vec![(0, "a.jpg".to_string()), (1, "a.jpg".to_string())];
        assert!(FoldTable::from_entries(entries).is_err());
    }

    #[test]
    fn test_assign_balanced() {
        let names: Vec<String> = (0..23).map(|i| format!("f{i}_0.jpg")).collect();
        let table = FoldTable::assign(&names, 5, Seed::new(1)).unwrap();

        assert_eq!(table.len(), 23);
        let mut sizes = [0usize; 5];
        for (k, _) in table.entries() {
            sizes[*k] += 1;
        }
        let max = sizes.iter().max().unwrap();
        let min = sizes.iter().min().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let names = ["a_1.jpg", "b_0.jpg", "c_1.jpg"];
        let table = FoldTable::assign(&names, 2, Seed::new(3)).unwrap();
        let path = dir.path().join("t.txt");
        table.write(&path).unwrap();
        assert_eq!(FoldTable::read(&path).unwrap(), table);
    }

    #[test]
    fn test_resolve_disjoint_and_complete() {
        let names: Vec<String> = (0..12).map(|i| format!("f{i}_1.jpg")).collect();
        let table = FoldTable::assign(&names, 3, Seed::new(5)).unwrap();
        let files = KFoldResolver::new(table)
            .data_dir("raw")
            .data_dir("aug")
            .seed(Seed::new(1))
            .resolve(1)
            .unwrap();

        assert_eq!(files.train.len() + files.valid.len(), 24);
        for dir in ["raw", "aug"] {
            let mut all: Vec<PathBuf> = files
                .train
                .iter()
                .chain(files.valid.iter())
                .filter(|p| p.starts_with(dir))
                .cloned()
                .collect();
            all.sort();
            all.dedup();
            assert_eq!(all.len(), 12);
        }
        for v in &files.valid {
            assert!(!files.train.contains(v));
        }
    }

    #[test]
    fn test_validation_order_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(dir.path(), "1,a_1.jpg\n0,b_0.jpg\n1,c_1.jpg\n1,d_0.jpg\n0,e_1.jpg\n");

        let first = resolve(&path, 1, &["data"], true).unwrap();
        let second = resolve(&path, 1, &["data"], true).unwrap();
        assert_eq!(first.valid, second.valid);
        assert_eq!(
            first.valid,
            vec![
                PathBuf::from("data/a_1.jpg"),
                PathBuf::from("data/c_1.jpg"),
                PathBuf::from("data/d_0.jpg")
            ]
        );
    }

    #[test]
    fn test_resolve_requires_data_dir() {
        let table = FoldTable::assign(&["a_1.jpg", "b_0.jpg"], 2, Seed::new(0)).unwrap();
        assert!(KFoldResolver::new(table).resolve(0).is_err());
    }
}
