//! Benchmarks for corpus statistics.
//!
//! Run with: cargo bench --bench moments_bench

use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use imgstack::core::Seed;
use imgstack::data::{accumulate, accumulate_par, Welford};

/// Write `n` random 64x64 images into a scratch directory.
fn create_corpus(dir: &std::path::Path, n: usize) -> Vec<PathBuf> {
    let mut rng = Seed::new(42).to_rng();
    (0..n)
        .map(|i| {
            let path = dir.join(format!("img{i}_0.png"));
            image::RgbImage::from_fn(64, 64, |_, _| image::Rgb(rng.gen()))
                .save(&path)
                .unwrap();
            path
        })
        .collect()
}

fn bench_welford_push(c: &mut Criterion) {
    let mut rng = Seed::new(0).to_rng();
    let samples: Vec<[f64; 3]> = (0..10_000).map(|_| rng.gen()).collect();

    c.bench_function("welford_push_10k", |b| {
        b.iter(|| {
            let mut acc = Welford::new();
            for &x in &samples {
                acc.push(black_box(x));
            }
            acc.finish()
        })
    });
}

fn bench_accumulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulate");
    group.sample_size(10);

    for n in [32, 128] {
        let dir = tempfile::tempdir().unwrap();
        let paths = create_corpus(dir.path(), n);

        group.bench_with_input(BenchmarkId::new("sequential", n), &paths, |b, paths| {
            b.iter(|| accumulate(black_box(paths), 1.0 / 255.0).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("parallel", n), &paths, |b, paths| {
            b.iter(|| accumulate_par(black_box(paths), 1.0 / 255.0).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_welford_push, bench_accumulate);
criterion_main!(benches);
