//! imgstack CLI for fold management, corpus statistics, batch previews and
//! stacking.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imgstack::core::{RunContext, Seed};
use imgstack::data::{class_counts, list_image_names, resolve, ClassBalancer, FoldTable, StatsCache};
use imgstack::ensemble::{StackingConfig, StackingEnsemble, StackingInputs};
use imgstack::{Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "imgstack")]
#[command(author, version)]
#[command(about = "Image augmentation pipeline and stacking ensemble")]
#[command(long_about = "imgstack: streaming image augmentation, k-fold management and stacking.

EXAMPLES:
  # Assign the images of a directory to 5 folds
  imgstack folds --images data/train --k 5 --out folds.txt

  # Precompute channel statistics of fold 0's training files
  imgstack stats --fold-table folds.txt --held-out 0 --data-dir data/train --mean mean.npy --std std.npy

  # Write previews of augmented training samples
  imgstack preview --config run.json --batches 4 --out preview/

  # Train the stacker, then predict the test set
  imgstack ensemble train --config stack.json
  imgstack ensemble predict --config stack.json")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign the images of a directory to k folds
    Folds {
        /// Directory of images
        #[arg(long, value_name = "DIR")]
        images: PathBuf,

        /// Number of folds
        #[arg(long, default_value = "5", value_name = "K")]
        k: usize,

        /// Output fold table
        #[arg(long, value_name = "FILE")]
        out: PathBuf,

        /// Random seed for the assignment
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,
    },
    /// Compute and cache per-channel statistics of a fold's training files
    Stats {
        /// Fold table
        #[arg(long, value_name = "FILE")]
        fold_table: PathBuf,

        /// Held-out fold
        #[arg(long, default_value = "0", value_name = "K")]
        held_out: usize,

        /// Image directory (repeatable)
        #[arg(long = "data-dir", value_name = "DIR", required = true)]
        data_dirs: Vec<PathBuf>,

        /// Mean cache file
        #[arg(long, value_name = "FILE")]
        mean: PathBuf,

        /// Std cache file
        #[arg(long, value_name = "FILE")]
        std: PathBuf,

        /// Factor applied to pixel values before accumulation
        #[arg(long, default_value = "1.0", value_name = "R")]
        rescale: f64,
    },
    /// Report class counts before and after up-sampling one label
    Balance {
        /// Fold table
        #[arg(long, value_name = "FILE")]
        fold_table: PathBuf,

        /// Held-out fold
        #[arg(long, default_value = "0", value_name = "K")]
        held_out: usize,

        /// Image directory (repeatable)
        #[arg(long = "data-dir", value_name = "DIR", required = true)]
        data_dirs: Vec<PathBuf>,

        /// Label position to balance
        #[arg(long, value_name = "P")]
        position: usize,

        /// Random seed for the extra draws
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,
    },
    /// Pull batches from the training flow and write previews
    Preview {
        /// Pipeline configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Fold table, overriding the configuration
        #[arg(long, value_name = "FILE")]
        fold_table: Option<PathBuf>,

        /// Number of batches to pull
        #[arg(long, default_value = "1", value_name = "N")]
        batches: usize,

        /// Preview directory, overriding the configuration
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Train and apply the stacking ensemble
    Ensemble {
        #[command(subcommand)]
        command: EnsembleCommands,
    },
}

#[derive(Subcommand)]
enum EnsembleCommands {
    /// Select base models and train a meta-model per label
    Train {
        /// Stacking configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Labels to train; all labels if omitted
        #[arg(long, value_delimiter = ',', value_name = "L,..")]
        labels: Option<Vec<usize>>,
    },
    /// Predict the test set with the trained meta-models
    Predict {
        /// Stacking configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Meta-level out-of-fold predictions
    Meta {
        /// Stacking configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Labels to predict
        #[arg(long, value_delimiter = ',', required = true, value_name = "L,..")]
        labels: Vec<usize>,

        /// Rerun cross-validation instead of reading the cache
        #[arg(long, default_value = "false")]
        refit: bool,

        /// Output `.npy` file
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Folds { images, k, out, seed } => handle_folds(images, k, out, seed),
        Commands::Stats {
            fold_table,
            held_out,
            data_dirs,
            mean,
            std,
            rescale,
        } => handle_stats(fold_table, held_out, data_dirs, mean, std, rescale),
        Commands::Balance {
            fold_table,
            held_out,
            data_dirs,
            position,
            seed,
        } => handle_balance(fold_table, held_out, data_dirs, position, seed),
        Commands::Preview {
            config,
            fold_table,
            batches,
            out,
        } => handle_preview(config, fold_table, batches, out),
        Commands::Ensemble { command } => handle_ensemble(command),
    }
}

fn handle_folds(images: PathBuf, k: usize, out: PathBuf, seed: u64) -> Result<()> {
    let names = list_image_names(&images)
        .with_context(|| format!("Failed to list images in {}", images.display()))?;
    if names.is_empty() {
        bail!("No images found in {}", images.display());
    }

    let table = FoldTable::assign(&names, k, Seed::new(seed)).context("Failed to assign folds")?;
    table
        .write(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("Assigned {} images to {} folds -> {}", table.len(), k, out.display());
    Ok(())
}

fn handle_stats(
    fold_table: PathBuf,
    held_out: usize,
    data_dirs: Vec<PathBuf>,
    mean: PathBuf,
    std: PathBuf,
    rescale: f64,
) -> Result<()> {
    let files = resolve(&fold_table, held_out, &data_dirs, false)
        .with_context(|| format!("Failed to resolve fold {held_out} of {}", fold_table.display()))?;

    let cache = StatsCache::new(mean, std);
    let cached = cache.exists();
    let stats = cache
        .check_or_compute(&files.train, rescale)
        .context("Failed to compute channel statistics")?;

    println!("Channel statistics ({} training files)", files.train.len());
    println!("─────────────────────────────────────────");
    println!("  Source: {}", if cached { "cache" } else { "computed" });
    println!("  Mean:   {:?}", stats.mean);
    println!("  Std:    {:?}", stats.std);
    Ok(())
}

fn handle_balance(
    fold_table: PathBuf,
    held_out: usize,
    data_dirs: Vec<PathBuf>,
    position: usize,
    seed: u64,
) -> Result<()> {
    let files = resolve(&fold_table, held_out, &data_dirs, false)
        .with_context(|| format!("Failed to resolve fold {held_out} of {}", fold_table.display()))?;

    let (neg, pos) = class_counts(&files.train, position).context("Failed to read labels")?;
    let balanced = ClassBalancer::new(Seed::new(seed))
        .balance(&files.train, &[position])
        .with_context(|| format!("Failed to balance label {position}"))?;
    let (neg_after, pos_after) = class_counts(&balanced, position)?;

    println!("Label {position}");
    println!("  Before: {neg} negative / {pos} positive");
    println!("  After:  {neg_after} negative / {pos_after} positive");
    Ok(())
}

fn handle_preview(
    config_path: PathBuf,
    fold_table: Option<PathBuf>,
    batches: usize,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut config = PipelineConfig::from_json_file(&config_path)
        .with_context(|| format!("Failed to parse {}", config_path.display()))?;
    if let Some(fold_table) = fold_table {
        config.fold_table = fold_table;
    }
    if let Some(out) = out {
        config.preview_dir = Some(out);
    }
    let Some(preview_dir) = config.preview_dir.clone() else {
        bail!("No preview directory: pass --out or set preview_dir");
    };

    let mut ctx = RunContext::with_seed(config.seed);
    let mut pipeline = Pipeline::new(config).context("Failed to build pipeline")?;
    let flow = pipeline
        .training_flow(&mut ctx)
        .context("Failed to build training flow")?;

    for step in 0..batches {
        let batch = flow
            .next_batch()
            .with_context(|| format!("Batch {step} failed"))?;
        tracing::info!(step, size = batch.len(), epoch = batch.epoch, "pulled batch");
    }

    let written = flow.sink().map_or(0, |s| s.written());
    println!("Wrote {written} previews to {}", preview_dir.display());
    Ok(())
}

fn load_ensemble(config_path: &Path) -> Result<StackingEnsemble> {
    let config = StackingConfig::from_json_file(config_path)
        .with_context(|| format!("Failed to parse {}", config_path.display()))?;
    Ok(StackingEnsemble::new(config))
}

fn handle_ensemble(command: EnsembleCommands) -> Result<()> {
    match command {
        EnsembleCommands::Train { config, labels } => {
            let ensemble = load_ensemble(&config)?;
            let selections = match labels {
                None => ensemble.train_all_label().context("Training failed")?,
                Some(labels) => {
                    let inputs =
                        StackingInputs::load(ensemble.config()).context("Failed to load stacking inputs")?;
                    labels
                        .into_iter()
                        .map(|label| {
                            ensemble
                                .train_label(&inputs, label)
                                .with_context(|| format!("Training label {label} failed"))
                        })
                        .collect::<Result<Vec<_>>>()?
                }
            };

            println!("{:<8} {:>8} {:>10}  models", "label", "score", "threshold");
            for s in &selections {
                println!("{:<8} {:>8.4} {:>10.2}  {}", s.label, s.score, s.threshold, s.models.join(","));
            }
            Ok(())
        }
        EnsembleCommands::Predict { config } => {
            let ensemble = load_ensemble(&config)?;
            let predictions = ensemble.build_and_predict_test().context("Prediction failed")?;
            println!(
                "Predicted {} rows x {} labels -> {}",
                predictions.nrows(),
                predictions.ncols(),
                ensemble.config().model_dir.display()
            );
            Ok(())
        }
        EnsembleCommands::Meta {
            config,
            labels,
            refit,
            out,
        } => {
            let ensemble = load_ensemble(&config)?;
            let meta = ensemble
                .get_meta_predict(&labels, refit)
                .context("Meta prediction failed")?;
            if let Some(out) = out {
                ndarray_npy::write_npy(&out, &meta)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
                println!("Wrote {:?} meta predictions to {}", meta.dim(), out.display());
            } else {
                let summary = serde_json::json!({
                    "rows": meta.nrows(),
                    "labels": labels,
                    "mean": meta.mean_axis(ndarray::Axis(0)).map(|m| m.to_vec()),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Ok(())
        }
    }
}
