use rand::prelude::*;

use crate::data::Instance;

/// Generate random feature rows, uniform in `[min, max]`.
pub fn random_features(rows: usize, cols: usize, seed: u64, min: f64, max: f64) -> Vec<Vec<f64>> {
    assert!(max >= min);
    let mut rng = StdRng::seed_from_u64(seed);
    let width = max - min;
    (0..rows)
        .map(|_| (0..cols).map(|_| min + rng.r#gen::<f64>() * width).collect())
        .collect()
}

/// A stream whose label is a linear model of the features plus uniform noise.
///
/// Features are uniform in `[0, 1]`. Returns `(instances, weights, bias)`.
pub fn linear_stream(
    rows: usize,
    cols: usize,
    seed: u64,
    noise_amplitude: f64,
) -> (Vec<Instance>, Vec<f64>, f64) {
    let features = random_features(rows, cols, seed, 0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));

    let weights: Vec<f64> = (0..cols).map(|_| rng.r#gen::<f64>() * 2.0 - 1.0).collect();
    let bias: f64 = rng.r#gen::<f64>() * 0.5 - 0.25;

    let instances = features
        .into_iter()
        .map(|row| {
            let mut y = bias + row.iter().zip(&weights).map(|(x, w)| x * w).sum::<f64>();
            if noise_amplitude > 0.0 {
                y += (rng.r#gen::<f64>() * 2.0 - 1.0) * noise_amplitude;
            }
            Instance::new(row, y)
        })
        .collect();

    (instances, weights, bias)
}

/// A one-dimensional stream with label noise growing linearly in `x`.
///
/// `x` is uniform in `[0, 1]`; the label is `x` plus uniform noise of
/// amplitude `x`, so intervals should widen to the right. A second,
/// uninformative feature is appended.
pub fn heteroscedastic_stream(rows: usize, seed: u64) -> Vec<Instance> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows)
        .map(|_| {
            let x: f64 = rng.r#gen();
            let noise: f64 = rng.r#gen::<f64>() * 2.0 - 1.0;
            let distractor: f64 = rng.r#gen();
            Instance::new(vec![x, distractor], x + noise * x)
        })
        .collect()
}

/// Labels drawn uniformly from `[min, max]`, for sketch tests.
pub fn uniform_values(n: usize, seed: u64, min: f64, max: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(min..=max)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generators_are_deterministic() {
        let (a, wa, ba) = linear_stream(20, 3, 5, 0.1);
        let (b, wb, bb) = linear_stream(20, 3, 5, 0.1);
        assert_eq!(a, b);
        assert_eq!(wa, wb);
        assert_eq!(ba, bb);
        assert_eq!(a[0].n_features(), 3);
    }

    #[test]
    fn heteroscedastic_noise_is_bounded_by_x() {
        for inst in heteroscedastic_stream(200, 3) {
            let x = inst.feature(0);
            assert!((inst.label() - x).abs() <= x + 1e-12);
        }
    }
}
