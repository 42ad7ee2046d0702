//! Per-label stacking over base-model predictions.
//!
//! Inputs live in two directories of `.npy` files:
//! - `oof_dir/<model>.npy`: `(N, L)` out-of-fold probabilities of each base
//!   model, plus `labels.npy` `(N, L)` ground truth and `folds.npy` `(N,)`
//!   fold ids (`i64`).
//! - `test_dir/<model>.npy`: `(M, L)` test probabilities.
//!
//! For every label the stacker ranks base models by their own score, drops
//! models highly correlated with a better one, then greedily adds models to a
//! boosted meta-model while the cross-validated score improves. Artifacts go to
//! `model_dir/label_<i>/{model.json, features.json, meta_oof.npy}`.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_npy::{read_npy, write_npy};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::correlation::correlation_prune;
use crate::error::{EnsembleError, Result};
use crate::gbdt::{Booster, BoosterParams};
use crate::metrics::{improves, worst, EvalMetric, MetricKind};
use crate::search::{ParamSearch, ParamSpace, Trial};
use imgstack_core::Seed;

/// File name of the ground-truth array in the out-of-fold directory.
pub const LABELS_FILE: &str = "labels.npy";
/// File name of the fold-id array in the out-of-fold directory.
pub const FOLDS_FILE: &str = "folds.npy";
/// File name of the stacked test predictions in the model directory.
pub const TEST_PREDICTIONS_FILE: &str = "test_predictions.npy";

/// Stacker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingConfig {
    /// Directory of out-of-fold predictions, labels and fold ids.
    pub oof_dir: PathBuf,
    /// Directory of test predictions.
    pub test_dir: PathBuf,
    /// Directory receiving trained artifacts.
    pub model_dir: PathBuf,
    /// Base models to consider; every `.npy` in `oof_dir` if `None`.
    pub models: Option<Vec<String>>,
    /// Maximum absolute Pearson correlation between kept base models.
    pub corr_threshold: f64,
    /// Random-search trials per candidate set; 0 tries the whole grid.
    pub search: usize,
    /// Maximum number of base models per label.
    pub top_n: usize,
    /// Boosting rounds.
    pub n_rounds: usize,
    /// Stop a fold early after this many rounds without improvement.
    pub early_stopping_rounds: Option<usize>,
    /// Hyperparameter values to search.
    pub param_space: ParamSpace,
    /// Selection metric.
    pub metric: MetricKind,
    /// Seed for the random search.
    pub seed: Seed,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            oof_dir: PathBuf::from("oof"),
            test_dir: PathBuf::from("test"),
            model_dir: PathBuf::from("models"),
            models: None,
            corr_threshold: 0.9,
            search: 20,
            top_n: 10,
            n_rounds: 1000,
            early_stopping_rounds: Some(50),
            param_space: ParamSpace::default(),
            metric: MetricKind::default(),
            seed: Seed::new(42),
        }
    }
}

impl StackingConfig {
    /// Create a configuration over the given directories.
    #[must_use]
    pub fn new(oof_dir: impl Into<PathBuf>, test_dir: impl Into<PathBuf>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            oof_dir: oof_dir.into(),
            test_dir: test_dir.into(),
            model_dir: model_dir.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Out-of-fold predictions, ground truth and fold ids.
#[derive(Debug, Clone)]
pub struct StackingInputs {
    names: Vec<String>,
    oof: Vec<Array2<f32>>,
    labels: Array2<f32>,
    folds: Array1<i64>,
}

impl StackingInputs {
    /// Assemble inputs from arrays.
    ///
    /// # Errors
    ///
    /// Returns an error unless every prediction array has the shape of
    /// `labels`, `folds` has one id per row, and at least one model is given.
    pub fn from_arrays(
        names: Vec<String>,
        oof: Vec<Array2<f32>>,
        labels: Array2<f32>,
        folds: Array1<i64>,
    ) -> Result<Self> {
        if names.is_empty() || names.len() != oof.len() {
            return Err(EnsembleError::Data(format!(
                "{} model names for {} prediction arrays",
                names.len(),
                oof.len()
            )));
        }
        for (name, pred) in names.iter().zip(&oof) {
            if pred.dim() != labels.dim() {
                return Err(EnsembleError::shape(
                    format!("{:?} for {name}", labels.dim()),
                    format!("{:?}", pred.dim()),
                ));
            }
        }
        if folds.len() != labels.nrows() {
            return Err(EnsembleError::shape(
                format!("{} fold ids", labels.nrows()),
                format!("{}", folds.len()),
            ));
        }
        Ok(Self {
            names,
            oof,
            labels,
            folds,
        })
    }

    /// Load from `config.oof_dir`.
    pub fn load(config: &StackingConfig) -> Result<Self> {
        let names = match &config.models {
            Some(models) => models.clone(),
            None => discover_models(&config.oof_dir)?,
        };
        let oof = names
            .iter()
            .map(|name| read_model(&config.oof_dir, name))
            .collect::<Result<Vec<_>>>()?;
        let labels: Array2<f32> = read_npy(config.oof_dir.join(LABELS_FILE))?;
        let folds: Array1<i64> = read_npy(config.oof_dir.join(FOLDS_FILE))?;
        tracing::info!(
            models = names.len(),
            rows = labels.nrows(),
            labels = labels.ncols(),
            "loaded stacking inputs"
        );
        Self::from_arrays(names, oof, labels, folds)
    }

    /// Base model names.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.labels.nrows()
    }

    /// Number of labels.
    #[must_use]
    pub fn n_labels(&self) -> usize {
        self.labels.ncols()
    }

    /// Ground truth of one label.
    #[must_use]
    pub fn target(&self, label: usize) -> ArrayView1<'_, f32> {
        self.labels.column(label)
    }

    /// Fold ids.
    #[must_use]
    pub fn folds(&self) -> ArrayView1<'_, i64> {
        self.folds.view()
    }

    /// Predictions of one model for one label.
    #[must_use]
    pub fn column(&self, model: usize, label: usize) -> ArrayView1<'_, f32> {
        self.oof[model].column(label)
    }

    /// Feature matrix of the given models for one label.
    #[must_use]
    pub fn features(&self, models: &[usize], label: usize) -> Array2<f32> {
        stack_columns(self.n_rows(), models.iter().map(|&m| self.column(m, label)))
    }

    fn check_label(&self, label: usize) -> Result<()> {
        if label >= self.n_labels() {
            return Err(EnsembleError::Data(format!(
                "label {label} out of range for {} labels",
                self.n_labels()
            )));
        }
        Ok(())
    }
}

fn stack_columns<'a>(rows: usize, columns: impl Iterator<Item = ArrayView1<'a, f32>>) -> Array2<f32> {
    let columns: Vec<_> = columns.collect();
    let mut x = Array2::<f32>::zeros((rows, columns.len()));
    for (j, col) in columns.iter().enumerate() {
        x.column_mut(j).assign(col);
    }
    x
}

fn discover_models(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_npy = path.extension().is_some_and(|e| e == "npy");
        let file = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !is_npy || file == LABELS_FILE || file == FOLDS_FILE {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    if names.is_empty() {
        return Err(EnsembleError::Data(format!(
            "no model predictions found in {}",
            dir.display()
        )));
    }
    Ok(names)
}

fn read_model(dir: &Path, name: &str) -> Result<Array2<f32>> {
    let path = dir.join(format!("{name}.npy"));
    if !path.exists() {
        return Err(EnsembleError::Data(format!("missing predictions {}", path.display())));
    }
    Ok(read_npy(path)?)
}

/// Cross-validated meta-model predictions.
#[derive(Debug, Clone)]
pub struct CvOutcome {
    /// Score of the out-of-fold predictions.
    pub score: f64,
    /// Threshold reported by the metric.
    pub threshold: f64,
    /// Out-of-fold probabilities, one per row.
    pub oof: Array1<f32>,
    /// Mean number of trees kept per fold.
    pub rounds: usize,
}

/// K-fold cross-validation of one booster configuration, folds given by id.
///
/// # Errors
///
/// Returns an error with fewer than two distinct fold ids.
pub fn cross_validate(
    x: ArrayView2<'_, f32>,
    y: ArrayView1<'_, f32>,
    folds: ArrayView1<'_, i64>,
    params: BoosterParams,
    early_stopping: Option<usize>,
    metric: &dyn EvalMetric,
) -> Result<CvOutcome> {
    let n = x.nrows();
    let ids: BTreeSet<i64> = folds.iter().copied().collect();
    if ids.len() < 2 {
        return Err(EnsembleError::Data(format!(
            "cross-validation needs at least 2 folds, got {}",
            ids.len()
        )));
    }

    let mut oof = Array1::<f32>::zeros(n);
    let mut trees = 0usize;
    for &fold in &ids {
        let (train, valid): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| folds[i] != fold);
        let (xt, yt) = (x.select(Axis(0), &train), y.select(Axis(0), &train));
        let (xv, yv) = (x.select(Axis(0), &valid), y.select(Axis(0), &valid));

        let model = Booster::fit_with_eval(xt.view(), yt.view(), Some((xv.view(), yv.view())), params, early_stopping)?;
        let pred = model.predict_proba(xv.view())?;
        for (k, &i) in valid.iter().enumerate() {
            oof[i] = pred[k];
        }
        trees += model.n_trees();
    }

    let (score, threshold) = metric.evaluate(y, oof.view());
    Ok(CvOutcome {
        score,
        threshold,
        oof,
        rounds: (trees as f64 / ids.len() as f64).round().max(1.0) as usize,
    })
}

/// One accepted step of greedy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionStep {
    /// Model added.
    pub model: String,
    /// Cross-validated score after adding it.
    pub score: f64,
}

/// What was learned for one label; stored as `features.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSelection {
    /// Label index.
    pub label: usize,
    /// Selected base models in feature order.
    pub models: Vec<String>,
    /// Best searched parameters.
    pub params: BoosterParams,
    /// Rounds used for the model fitted on all rows.
    pub final_rounds: usize,
    /// Cross-validated score.
    pub score: f64,
    /// Decision threshold from the metric.
    pub threshold: f64,
    /// Metric name.
    pub metric: String,
    /// Accepted selection steps.
    pub history: Vec<SelectionStep>,
}

/// Trains and applies one boosted meta-model per label.
///
/// # Example
///
/// ```rust,ignore
/// use imgstack_ensemble::{StackingConfig, StackingEnsemble};
///
/// let config = StackingConfig::from_json_file("stacking.json")?;
/// let ensemble = StackingEnsemble::new(config);
/// ensemble.train_all_label()?;
/// let test = ensemble.build_and_predict_test()?;
/// let meta = ensemble.get_meta_predict(&[1, 2, 3], false)?;
/// ```
pub struct StackingEnsemble {
    config: StackingConfig,
    metric: Box<dyn EvalMetric>,
}

impl std::fmt::Debug for StackingEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackingEnsemble")
            .field("config", &self.config)
            .field("metric", &self.metric.name())
            .finish()
    }
}

impl StackingEnsemble {
    /// Create a stacker.
    #[must_use]
    pub fn new(config: StackingConfig) -> Self {
        let metric = config.metric.build();
        Self { config, metric }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &StackingConfig {
        &self.config
    }

    fn label_dir(&self, label: usize) -> PathBuf {
        self.config.model_dir.join(format!("label_{label}"))
    }

    fn search(&self, label: usize) -> ParamSearch {
        ParamSearch::random(
            self.config.param_space.clone(),
            self.config.search,
            self.config.seed.derive(&format!("label-{label}")),
        )
        .n_rounds(self.config.n_rounds)
        .maximize(self.metric.higher_is_better())
    }

    /// Select base models and parameters for one label.
    ///
    /// Returns the selection and the cross-validated meta predictions of the
    /// chosen configuration.
    pub fn select_label(&self, inputs: &StackingInputs, label: usize) -> Result<(LabelSelection, CvOutcome)> {
        inputs.check_label(label)?;
        let metric = self.metric.as_ref();
        let y = inputs.target(label);
        let folds = inputs.folds();
        let es = self.config.early_stopping_rounds;

        let mut ranked: Vec<(usize, f64)> = (0..inputs.names().len())
            .map(|m| (m, metric.evaluate(y, inputs.column(m, label)).0))
            .collect();
        ranked.sort_by(|a, b| {
            let ord = a.1.total_cmp(&b.1);
            if metric.higher_is_better() {
                ord.reverse()
            } else {
                ord
            }
        });
        let order: Vec<usize> = ranked.iter().map(|&(m, _)| m).collect();
        let candidates = correlation_prune(&order, self.config.corr_threshold, |m| inputs.column(m, label));
        tracing::info!(
            label,
            candidates = candidates.len(),
            pruned = order.len() - candidates.len(),
            "ranked base models"
        );

        let search = self.search(label);
        let mut selected: Vec<usize> = Vec::new();
        let mut best: Option<Trial> = None;
        let mut history = Vec::new();

        while selected.len() < self.config.top_n {
            let remaining: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|c| !selected.contains(c))
                .collect();
            if remaining.is_empty() {
                break;
            }

            let evaluated: Vec<(usize, Trial)> = remaining
                .par_iter()
                .map(|&candidate| -> Result<(usize, Trial)> {
                    let mut feats = selected.clone();
                    feats.push(candidate);
                    let x = inputs.features(&feats, label);
                    let result = search.run(|params| {
                        let cv = cross_validate(x.view(), y, folds, *params, es, metric)?;
                        Ok((cv.score, cv.threshold))
                    })?;
                    Ok((candidate, result.best))
                })
                .collect::<Result<_>>()?;

            let Some((candidate, trial)) = evaluated
                .into_iter()
                .reduce(|a, b| if improves(metric, b.1.score, a.1.score) { b } else { a })
            else {
                break;
            };

            let current = best.as_ref().map_or(worst(metric), |b| b.score);
            if !improves(metric, trial.score, current) {
                break;
            }
            tracing::info!(
                label,
                model = %inputs.names()[candidate],
                score = trial.score,
                "added base model"
            );
            history.push(SelectionStep {
                model: inputs.names()[candidate].clone(),
                score: trial.score,
            });
            selected.push(candidate);
            best = Some(trial);
        }

        let best = best.ok_or_else(|| EnsembleError::Search(format!("no base model scored for label {label}")))?;
        let x = inputs.features(&selected, label);
        let cv = cross_validate(x.view(), y, folds, best.params, es, metric)?;
        let final_rounds = if es.is_some() { cv.rounds } else { best.params.n_rounds };

        let selection = LabelSelection {
            label,
            models: selected.iter().map(|&m| inputs.names()[m].clone()).collect(),
            params: best.params,
            final_rounds,
            score: cv.score,
            threshold: cv.threshold,
            metric: metric.name().to_string(),
            history,
        };
        Ok((selection, cv))
    }

    /// Train and save a meta-model for every label.
    pub fn train_all_label(&self) -> Result<Vec<LabelSelection>> {
        let inputs = StackingInputs::load(&self.config)?;
        (0..inputs.n_labels())
            .map(|label| self.train_label(&inputs, label))
            .collect()
    }

    /// Train and save the meta-model of one label.
    pub fn train_label(&self, inputs: &StackingInputs, label: usize) -> Result<LabelSelection> {
        let (selection, cv) = self.select_label(inputs, label)?;

        let index: Vec<usize> = selection
            .models
            .iter()
            .filter_map(|name| inputs.names().iter().position(|n| n == name))
            .collect();
        let x = inputs.features(&index, label);
        let model = Booster::fit(x.view(), inputs.target(label), selection.params.with_rounds(selection.final_rounds))?;

        let dir = self.label_dir(label);
        fs::create_dir_all(&dir)?;
        write_json(&dir.join("model.json"), &model)?;
        write_json(&dir.join("features.json"), &selection)?;
        write_npy(dir.join("meta_oof.npy"), &cv.oof)?;

        tracing::info!(
            label,
            models = ?selection.models,
            score = selection.score,
            threshold = selection.threshold,
            "trained meta-model"
        );
        Ok(selection)
    }

    /// Load the selection saved for a label.
    pub fn load_selection(&self, label: usize) -> Result<LabelSelection> {
        let path = self.label_dir(label).join("features.json");
        if !path.exists() {
            return Err(EnsembleError::NotTrained(label));
        }
        read_json(&path)
    }

    /// Load the meta-model saved for a label.
    pub fn load_model(&self, label: usize) -> Result<Booster> {
        let path = self.label_dir(label).join("model.json");
        if !path.exists() {
            return Err(EnsembleError::NotTrained(label));
        }
        read_json(&path)
    }

    /// Predict every label of the test set and save the `(M, L)` result.
    pub fn build_and_predict_test(&self) -> Result<Array2<f32>> {
        let labels: Array2<f32> = read_npy(self.config.oof_dir.join(LABELS_FILE))?;
        let n_labels = labels.ncols();

        let mut cache: Vec<(String, Array2<f32>)> = Vec::new();
        let mut columns: Vec<Array1<f32>> = Vec::with_capacity(n_labels);
        for label in 0..n_labels {
            let selection = self.load_selection(label)?;
            let model = self.load_model(label)?;

            for name in &selection.models {
                if !cache.iter().any(|(n, _)| n == name) {
                    let pred = read_model(&self.config.test_dir, name)?;
                    if pred.ncols() != n_labels {
                        return Err(EnsembleError::shape(
                            format!("(M, {n_labels}) test predictions for {name}"),
                            format!("{:?}", pred.dim()),
                        ));
                    }
                    cache.push((name.clone(), pred));
                }
            }

            let cols: Vec<ArrayView1<'_, f32>> = selection
                .models
                .iter()
                .filter_map(|name| cache.iter().find(|(n, _)| n == name))
                .map(|(_, pred)| pred.column(label))
                .collect();
            let rows = cols.first().map_or(0, |c| c.len());
            if cols.iter().any(|c| c.len() != rows) {
                return Err(EnsembleError::Data(
                    "test prediction files have different row counts".to_string(),
                ));
            }
            let x = stack_columns(rows, cols.into_iter());
            columns.push(model.predict_proba(x.view())?);
        }

        let rows = columns.first().map_or(0, Array1::len);
        let mut out = Array2::<f32>::zeros((rows, n_labels));
        for (label, col) in columns.iter().enumerate() {
            if col.len() != rows {
                return Err(EnsembleError::Data(
                    "test prediction files have different row counts".to_string(),
                ));
            }
            out.column_mut(label).assign(col);
        }

        fs::create_dir_all(&self.config.model_dir)?;
        write_npy(self.config.model_dir.join(TEST_PREDICTIONS_FILE), &out)?;
        tracing::info!(rows, labels = n_labels, "wrote stacked test predictions");
        Ok(out)
    }

    /// Meta-level out-of-fold predictions for `label_indices`, one column each.
    ///
    /// Cached `meta_oof.npy` files are reused unless `refit` is set or the
    /// cache is missing, in which case cross-validation is rerun with the saved
    /// selection and the cache rewritten.
    pub fn get_meta_predict(&self, label_indices: &[usize], refit: bool) -> Result<Array2<f32>> {
        let mut inputs: Option<StackingInputs> = None;
        let mut columns = Vec::with_capacity(label_indices.len());

        for &label in label_indices {
            let cache = self.label_dir(label).join("meta_oof.npy");
            if !refit && cache.exists() {
                let col: Array1<f32> = read_npy(&cache)?;
                columns.push(col);
                continue;
            }

            let selection = self.load_selection(label)?;
            if inputs.is_none() {
                inputs = Some(StackingInputs::load(&self.config)?);
            }
            let Some(inputs) = inputs.as_ref() else {
                continue;
            };
            inputs.check_label(label)?;

            let index = selection
                .models
                .iter()
                .map(|name| {
                    inputs
                        .names()
                        .iter()
                        .position(|n| n == name)
                        .ok_or_else(|| EnsembleError::Data(format!("model {name} is not among the inputs")))
                })
                .collect::<Result<Vec<_>>>()?;
            let x = inputs.features(&index, label);
            let cv = cross_validate(
                x.view(),
                inputs.target(label),
                inputs.folds(),
                selection.params,
                self.config.early_stopping_rounds,
                self.metric.as_ref(),
            )?;
            write_npy(&cache, &cv.oof)?;
            tracing::info!(label, score = cv.score, "recomputed meta predictions");
            columns.push(cv.oof);
        }

        let rows = columns.first().map_or(0, Array1::len);
        let mut out = Array2::<f32>::zeros((rows, columns.len()));
        for (j, col) in columns.iter().enumerate() {
            if col.len() != rows {
                return Err(EnsembleError::shape(format!("{rows} rows"), format!("{} rows", col.len())));
            }
            out.column_mut(j).assign(col);
        }
        Ok(out)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
