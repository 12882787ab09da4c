//! Property tests for merging quantile sketches.
//!
//! The union of sketches built over a partition of some values must answer
//! rank queries like a single sketch over all of them, whatever the merge
//! order.

use proptest::prelude::*;

use qrforest::sketch::{QuantileSketch, RankSketch};
use qrforest::testing::data::uniform_values;

const CAPACITY: usize = 100;
const PARTS: usize = 6;
const RANKS: [f64; 7] = [0.05, 0.1, 0.25, 0.5, 0.75, 0.9, 0.95];

fn sketch_of(values: impl IntoIterator<Item = f64>) -> QuantileSketch {
    let mut sketch = QuantileSketch::new(CAPACITY);
    for v in values {
        sketch.insert(v);
    }
    sketch
}

fn partition(values: &[(f64, usize)]) -> Vec<QuantileSketch> {
    (0..PARTS)
        .map(|part| sketch_of(values.iter().filter(|(_, p)| *p == part).map(|(v, _)| *v)))
        .collect()
}

fn fold(parts: impl IntoIterator<Item = QuantileSketch>) -> QuantileSketch {
    parts
        .into_iter()
        .fold(QuantileSketch::new(CAPACITY), |acc, s| acc.merge(&s))
}

/// Merge neighbours pairwise until one sketch is left.
fn pairwise(mut parts: Vec<QuantileSketch>) -> QuantileSketch {
    while parts.len() > 1 {
        parts = parts
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => a.merge(b),
                [a] => a.clone(),
                _ => unreachable!(),
            })
            .collect();
    }
    parts.pop().unwrap_or_else(|| QuantileSketch::new(CAPACITY))
}

/// Assert that `estimate` sits within `tolerance` of `rank` among `sorted`.
fn assert_rank_close(sorted: &[f64], estimate: f64, rank: f64, tolerance: f64) {
    let n = sorted.len() as f64;
    let below = sorted.partition_point(|&x| x < estimate) as f64 / n;
    let at_or_below = sorted.partition_point(|&x| x <= estimate) as f64 / n;
    assert!(
        below - tolerance <= rank && rank <= at_or_below + tolerance,
        "rank {rank}: estimate {estimate} spans [{below}, {at_or_below}] (tolerance {tolerance})"
    );
}

fn labeled_values() -> impl Strategy<Value = Vec<(f64, usize)>> {
    prop::collection::vec((-1e3f64..1e3, 0..PARTS), 20..1500)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn merge_order_does_not_matter(values in labeled_values()) {
        let mut sorted: Vec<f64> = values.iter().map(|(v, _)| *v).collect();
        sorted.sort_by(f64::total_cmp);
        let tolerance = 0.05 + 2.0 / sorted.len() as f64;

        let one_pass = sketch_of(values.iter().map(|(v, _)| *v));
        let parts = partition(&values);
        let forward = fold(parts.clone());
        let backward = fold(parts.iter().rev().cloned());
        let tree = pairwise(parts);

        for sketch in [&one_pass, &forward, &backward, &tree] {
            prop_assert_eq!(sketch.count(), sorted.len() as u64);
            prop_assert_eq!(sketch.min(), sorted.first().copied());
            prop_assert_eq!(sketch.max(), sorted.last().copied());
            for rank in RANKS {
                let estimate = sketch.quantile(rank).unwrap();
                assert_rank_close(&sorted, estimate, rank, tolerance);
            }
        }
    }

    #[test]
    fn merge_is_commutative(values in labeled_values()) {
        let parts = partition(&values);
        let (a, b) = (&parts[0], &parts[1]);
        let ab = a.merge(b);
        let ba = b.merge(a);
        prop_assert_eq!(ab.count(), ba.count());
        for rank in RANKS {
            prop_assert_eq!(ab.quantile(rank), ba.quantile(rank));
        }
    }

    #[test]
    fn merge_leaves_inputs_unchanged(values in labeled_values()) {
        let parts = partition(&values);
        let before: Vec<Option<f64>> = parts.iter().map(|s| s.quantile(0.5)).collect();
        let _ = fold(parts.clone());
        let _ = parts[0].merge(&parts[1]);
        let after: Vec<Option<f64>> = parts.iter().map(|s| s.quantile(0.5)).collect();
        prop_assert_eq!(before, after);
    }
}

#[test]
fn merging_many_small_sketches_tracks_uniform_quantiles() {
    let values = uniform_values(20_000, 3, 0.0, 1.0);
    let merged = values
        .chunks(37)
        .map(|chunk| sketch_of(chunk.iter().copied()))
        .fold(QuantileSketch::new(CAPACITY), |acc, s| acc.merge(&s));

    assert_eq!(merged.count(), 20_000);
    for rank in RANKS {
        let estimate = merged.quantile(rank).unwrap();
        assert!((estimate - rank).abs() < 0.03, "rank {rank}: {estimate}");
    }
    assert!(merged.centroid_count() < 10 * CAPACITY);
}
