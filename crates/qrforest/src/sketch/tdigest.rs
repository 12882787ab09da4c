//! Merging t-digest.
//!
//! Values are buffered and periodically compressed into weighted centroids.
//! A centroid at rank `q` may hold at most `4·N·q·(1−q)/δ` weight, where `N`
//! is the total count and `δ` the compression, so the tails stay exact while
//! the middle is summarized. Rank error is on the order of `1/δ`.

use std::borrow::Cow;

use super::RankSketch;

/// A weighted point summarizing adjacent values.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Centroid {
    mean: f64,
    weight: f64,
}

impl Centroid {
    #[inline]
    fn unit(value: f64) -> Self {
        Self {
            mean: value,
            weight: 1.0,
        }
    }

    #[inline]
    fn absorb(&mut self, other: &Centroid) {
        let total = self.weight + other.weight;
        self.mean += (other.mean - self.mean) * other.weight / total;
        self.weight = total;
    }
}

/// Quantile sketch used by tree leaves.
///
/// `merge` sorts the union of both inputs' centroids before compressing, so
/// `a.merge(&b)` and `b.merge(&a)` are identical. Regrouping three or more
/// merges changes the result only within the error bound.
#[derive(Debug, Clone)]
pub struct QuantileSketch {
    compression: f64,
    /// Compressed centroids sorted by mean.
    centroids: Vec<Centroid>,
    /// Values inserted since the last compression.
    buffer: Vec<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl QuantileSketch {
    /// Create an empty sketch with compression `capacity` (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            compression: capacity.max(1) as f64,
            centroids: Vec::new(),
            buffer: Vec::new(),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Compression parameter.
    pub fn compression(&self) -> f64 {
        self.compression
    }

    /// Smallest inserted value.
    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    /// Largest inserted value.
    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Number of centroids after compressing pending values.
    pub fn centroid_count(&self) -> usize {
        self.compressed().len()
    }

    fn buffer_capacity(&self) -> usize {
        ((self.compression * 4.0) as usize).max(16)
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut all = std::mem::take(&mut self.centroids);
        all.extend(self.buffer.drain(..).map(Centroid::unit));
        self.centroids = compress(all, self.compression);
    }

    fn compressed(&self) -> Cow<'_, [Centroid]> {
        if self.buffer.is_empty() {
            Cow::Borrowed(&self.centroids)
        } else {
            let mut all = self.centroids.clone();
            all.extend(self.buffer.iter().copied().map(Centroid::unit));
            Cow::Owned(compress(all, self.compression))
        }
    }
}

impl RankSketch for QuantileSketch {
    fn new(capacity: usize) -> Self {
        Self::with_capacity(capacity)
    }

    fn insert(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.buffer.push(value);
        if self.buffer.len() >= self.buffer_capacity() {
            self.flush();
        }
    }

    fn merge(&self, other: &Self) -> Self {
        let mut all = Vec::with_capacity(
            self.centroids.len() + self.buffer.len() + other.centroids.len() + other.buffer.len(),
        );
        for side in [self, other] {
            all.extend_from_slice(&side.centroids);
            all.extend(side.buffer.iter().copied().map(Centroid::unit));
        }
        let compression = self.compression.max(other.compression);

        Self {
            compression,
            centroids: compress(all, compression),
            buffer: Vec::new(),
            count: self.count + other.count,
            sum: self.sum + other.sum,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn quantile(&self, rank: f64) -> Option<f64> {
        if self.count == 0 || rank.is_nan() {
            return None;
        }
        let rank = rank.clamp(0.0, 1.0);
        if rank == 0.0 {
            return Some(self.min);
        }
        if rank == 1.0 {
            return Some(self.max);
        }

        let centroids = self.compressed();
        Some(interpolate(&centroids, rank, self.min, self.max))
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    fn memory_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.centroids.capacity() * std::mem::size_of::<Centroid>()
            + self.buffer.capacity() * std::mem::size_of::<f64>()
    }
}

/// Sort and compress centroids under the t-digest size bound.
fn compress(mut centroids: Vec<Centroid>, compression: f64) -> Vec<Centroid> {
    centroids.sort_by(|a, b| {
        a.mean
            .total_cmp(&b.mean)
            .then_with(|| a.weight.total_cmp(&b.weight))
    });
    let total: f64 = centroids.iter().map(|c| c.weight).sum();

    let mut out = Vec::new();
    let mut iter = centroids.into_iter();
    let Some(mut current) = iter.next() else {
        return out;
    };
    let mut weight_so_far = 0.0;

    for next in iter {
        let proposed = current.weight + next.weight;
        let q = (weight_so_far + proposed / 2.0) / total;
        let limit = 4.0 * total * q * (1.0 - q) / compression;

        if proposed <= limit {
            current.absorb(&next);
        } else {
            weight_so_far += current.weight;
            out.push(current);
            current = next;
        }
    }
    out.push(current);
    out
}

/// Read the value at `rank` (strictly inside (0, 1)).
///
/// Each centroid spans from the midpoint with its left neighbour to the
/// midpoint with its right neighbour (`min`/`max` at the ends); the value is
/// interpolated linearly across that span.
fn interpolate(centroids: &[Centroid], rank: f64, min: f64, max: f64) -> f64 {
    let total: f64 = centroids.iter().map(|c| c.weight).sum();
    let target = rank * total;
    let last = centroids.len() - 1;

    let mut cumulative = 0.0;
    for (i, c) in centroids.iter().enumerate() {
        let upper = cumulative + c.weight;
        if target <= upper || i == last {
            let frac = ((target - cumulative) / c.weight).clamp(0.0, 1.0);
            let lo = if i == 0 {
                min
            } else {
                (centroids[i - 1].mean + c.mean) / 2.0
            };
            let hi = if i == last {
                max
            } else {
                (c.mean + centroids[i + 1].mean) / 2.0
            };
            return lo + frac * (hi - lo);
        }
        cumulative = upper;
    }
    max
}
