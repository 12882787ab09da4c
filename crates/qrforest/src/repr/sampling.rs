//! Feature subspace sampling.

use rand::Rng;

/// Sample `k` indices from `0..n` without replacement.
///
/// Returns sorted indices. `k` is clamped to `n`.
pub fn sample_without_replacement<R: Rng>(n: usize, k: usize, rng: &mut R) -> Box<[u32]> {
    let k = k.min(n);
    let mut indices: Vec<u32> = (0..n as u32).collect();

    // Partial Fisher-Yates shuffle
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }

    indices.truncate(k);
    indices.sort_unstable();
    indices.into_boxed_slice()
}
