//! Online training and interval prediction benchmarks.
//!
//! Measures how throughput scales with the worker count, and what the
//! conformal layer costs on top of the plain forest.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use qrforest::calibration::{CalibrationConfig, ConformalForest, Recalibration};
use qrforest::data::Instance;
use qrforest::model::{ForestConfig, QuantileForest};
use qrforest::testing::data::linear_stream;

const N_FEATURES: usize = 20;
const N_MEMBERS: usize = 30;

fn forest_config(n_jobs: i32) -> ForestConfig {
    ForestConfig::builder()
        .n_members(N_MEMBERS)
        .n_jobs(n_jobs)
        .build()
        .unwrap()
}

fn warm_forest(n_jobs: i32, stream: &[Instance]) -> QuantileForest {
    let mut forest = QuantileForest::new(forest_config(n_jobs)).unwrap();
    for inst in stream {
        forest.train(inst).unwrap();
    }
    forest
}

// =============================================================================
// Training
// =============================================================================

fn bench_train_thread_scaling(c: &mut Criterion) {
    let rows = 2_000;
    let (stream, _, _) = linear_stream(rows, N_FEATURES, 42, 0.1);

    let mut group = c.benchmark_group("forest/train/thread_scaling");
    group.throughput(Throughput::Elements(rows as u64));
    group.sample_size(10);

    for n_jobs in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("members", n_jobs), &stream, |b, stream| {
            b.iter(|| black_box(warm_forest(n_jobs, stream)));
        });
    }

    group.finish();
}

// =============================================================================
// Prediction
// =============================================================================

fn bench_predict_thread_scaling(c: &mut Criterion) {
    let (train, _, _) = linear_stream(5_000, N_FEATURES, 42, 0.1);
    let (queries, _, _) = linear_stream(1_000, N_FEATURES, 7, 0.0);

    let mut group = c.benchmark_group("forest/predict/thread_scaling");
    group.throughput(Throughput::Elements(queries.len() as u64));

    for n_jobs in [1, 2, 4, 8] {
        let forest = warm_forest(n_jobs, &train);
        group.bench_with_input(BenchmarkId::new("interval", n_jobs), &queries, |b, queries| {
            b.iter(|| {
                for query in queries {
                    black_box(forest.predict(black_box(query)).unwrap());
                }
            });
        });
    }

    let forest = warm_forest(1, &train);
    group.bench_with_input(BenchmarkId::new("point", 1), &queries, |b, queries| {
        b.iter(|| {
            for query in queries {
                black_box(forest.predict_point(black_box(query)).unwrap());
            }
        });
    });

    group.finish();
}

// =============================================================================
// Calibration
// =============================================================================

fn bench_calibration_strategies(c: &mut Criterion) {
    let rows = 1_000;
    let (stream, _, _) = linear_stream(rows, N_FEATURES, 42, 0.1);

    let mut group = c.benchmark_group("forest/train/calibration");
    group.throughput(Throughput::Elements(rows as u64));
    group.sample_size(10);

    let strategies = [
        ("exact", Recalibration::Exact),
        ("approximate", Recalibration::default()),
    ];
    for (name, strategy) in strategies {
        group.bench_with_input(BenchmarkId::new(name, rows), &stream, |b, stream| {
            b.iter(|| {
                let config = CalibrationConfig::builder()
                    .forest(forest_config(1))
                    .strategy(strategy)
                    .window(500)
                    .build()
                    .unwrap();
                let mut engine: ConformalForest = ConformalForest::new(config).unwrap();
                for inst in stream {
                    engine.train(inst).unwrap();
                }
                black_box(engine.measurements())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_train_thread_scaling,
    bench_predict_thread_scaling,
    bench_calibration_strategies
);
criterion_main!(benches);
