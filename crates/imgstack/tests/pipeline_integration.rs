//! Integration tests for the full pipeline.
//!
//! These tests build a small labelled corpus on disk and run it through fold
//! resolution, up-sampling, statistics, both flows and the stacker.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use ndarray_npy::write_npy;
use rand::Rng;

use imgstack::data::label_matrix;
use imgstack::ensemble::{ParamSpace, StackingConfig, FOLDS_FILE, LABELS_FILE};
use imgstack::prelude::*;

const N_IMAGES: usize = 12;

/// Twelve 8x8 images named `img<i>_<a>_<b>.png`. Label `a` is positive for
/// the first four images only; label `b` alternates.
fn write_corpus(root: &Path) -> Vec<String> {
    let data = root.join("data");
    std::fs::create_dir_all(&data).unwrap();
    (0..N_IMAGES)
        .map(|i| {
            let name = format!("img{i}_{}_{}.png", u8::from(i < 4), i % 2);
            let v = (i * 20) as u8;
            image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([v, (x * 30) as u8, (y * 30) as u8]))
                .save(data.join(&name))
                .unwrap();
            name
        })
        .collect()
}

/// Fold `i % 3` for image `i`.
fn write_folds(root: &Path, names: &[String]) -> PathBuf {
    let entries = names
        .iter()
        .enumerate()
        .map(|(i, n)| (i % 3, n.clone()))
        .collect();
    let path = root.join("folds.txt");
    FoldTable::from_entries(entries).unwrap().write(&path).unwrap();
    path
}

fn config(root: &Path) -> PipelineConfig {
    let names = write_corpus(root);
    PipelineConfig {
        fold_table: write_folds(root, &names),
        data_dirs: vec![root.join("data")],
        held_out: 0,
        upsample_position: Some(0),
        batch_size: 4,
        mean_path: root.join("mean.npy"),
        std_path: root.join("std.npy"),
        augment: AugmentConfig::default()
            .with_target_size(TargetSize::square(6))
            .with_rotation_range(15.0)
            .with_horizontal_flip(true)
            .with_featurewise(true)
            .with_pca_jitter(true)
            .with_rescale(1.0 / 255.0),
        preview_dir: Some(root.join("preview")),
        preview_limit: 3,
        seed: Seed::new(7),
        ..Default::default()
    }
}

#[test]
fn test_fold_resolution_and_upsampling() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config(dir.path())).unwrap();

    // images 0, 3, 6, 9 are held out
    assert_eq!(pipeline.files().valid.len(), 4);
    assert_eq!(pipeline.files().train.len(), 8);

    // two positives (images 1 and 2) against six negatives
    let balanced = pipeline.training_files().unwrap();
    assert_eq!(balanced.len(), 12);
    let labels = label_matrix(&balanced, Some(&[0usize][..])).unwrap();
    assert_eq!(labels.sum(), 6);
}

#[test]
fn test_training_flow_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(config(dir.path())).unwrap();
    let mut ctx = RunContext::with_seed(Seed::new(1));

    let flow = pipeline.training_flow(&mut ctx).unwrap();
    assert_eq!(ctx.training_times(), 1);
    assert_eq!(flow.steps_per_epoch(), 3);
    assert!(dir.path().join("mean.npy").exists());
    assert!(dir.path().join("std.npy").exists());

    let mut positives = 0;
    for batch in flow.iter().take(flow.steps_per_epoch()) {
        let batch = batch.unwrap();
        assert_eq!(batch.images.dim(), (4, 6, 6, 3));
        assert!(batch.images.iter().all(|v| v.is_finite()));
        let labels = batch.labels.unwrap();
        assert_eq!(labels.dim(), (4, 2));
        positives += labels.column(0).sum();
    }
    assert_eq!(positives, 6);
    assert_eq!(flow.epoch(), 1);

    let previews = std::fs::read_dir(dir.path().join("preview")).unwrap().count();
    assert_eq!(previews, 3);
}

#[test]
fn test_validation_flow_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(config(dir.path())).unwrap();
    let mut ctx = RunContext::with_seed(Seed::new(1));

    let a = pipeline.validation_flow(&mut ctx).unwrap().next_batch().unwrap();
    let b = pipeline.validation_flow(&mut ctx).unwrap().next_batch().unwrap();
    assert_eq!(ctx.validation_times(), 2);
    assert_eq!(a.indices, vec![0, 1, 2, 3]);
    assert_eq!(a.images, b.images);

    let expected = label_matrix(&pipeline.files().valid, None).unwrap();
    assert_eq!(a.labels.unwrap(), expected);
}

#[test]
fn test_stats_are_cached() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(config(dir.path())).unwrap();
    let stats = pipeline.channel_stats().unwrap();

    let cached = StatsCache::new(dir.path().join("mean.npy"), dir.path().join("std.npy"))
        .load()
        .unwrap();
    assert_eq!(stats, cached);
    // red channel varies across images, the gradients do not
    assert!(stats.mean[0] > 0.0 && stats.mean[0] < 1.0);
}

#[test]
fn test_held_out_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        held_out: 3,
        ..config(dir.path())
    };
    assert!(matches!(Pipeline::new(config), Err(PipelineError::Config(_))));
}

#[test]
fn test_stacking_on_corpus_labels() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let names = write_corpus(root);
    let files: Vec<PathBuf> = names.iter().map(|n| root.join("data").join(n)).collect();
    let truth = label_matrix(&files, None).unwrap().mapv(|v| v as f32);

    let mut rng = Seed::new(3).to_rng();
    let good = truth.mapv(|t| 0.2 + 0.6 * t + rng.gen_range(-0.1..0.1));
    let noise = Array2::from_shape_fn(truth.dim(), |_| rng.gen::<f32>());
    let folds = Array1::from_shape_fn(N_IMAGES, |i| (i % 3) as i64);

    for sub in ["oof", "test"] {
        std::fs::create_dir_all(root.join(sub)).unwrap();
        write_npy(root.join(sub).join("good.npy"), &good).unwrap();
        write_npy(root.join(sub).join("noise.npy"), &noise).unwrap();
    }
    write_npy(root.join("oof").join(LABELS_FILE), &truth).unwrap();
    write_npy(root.join("oof").join(FOLDS_FILE), &folds).unwrap();

    let config = PipelineConfig {
        stacking: StackingConfig {
            n_rounds: 10,
            search: 0,
            top_n: 2,
            early_stopping_rounds: None,
            param_space: ParamSpace {
                eta: vec![0.3],
                max_depth: vec![1],
                min_child_weight: vec![1.0],
            },
            ..StackingConfig::new(root.join("oof"), root.join("test"), root.join("models"))
        },
        ..config(root)
    };
    let ensemble = Pipeline::new(config).unwrap().ensemble();

    let selections = ensemble.train_all_label().unwrap();
    assert_eq!(selections.len(), 2);
    assert!(selections.iter().all(|s| !s.models.is_empty()));

    let test = ensemble.build_and_predict_test().unwrap();
    assert_eq!(test.dim(), (N_IMAGES, 2));

    let meta = ensemble.get_meta_predict(&[0, 1], false).unwrap();
    assert_eq!(meta.dim(), (N_IMAGES, 2));
}
