//! k-means++ training for coarse quantizers and PQ subcodebooks.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::simd;

/// Early-stop threshold on the maximum squared centroid movement.
const MOVEMENT_EPS: f32 = 1e-4;

/// Deterministic xorshift64 generator for seeding.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn next_f32(&mut self) -> f32 {
        (self.next() >> 40) as f32 / (1u64 << 24) as f32
    }

    fn next_below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

/// Runs k-means++ over `n` vectors of `dim` floats stored row-major in
/// `data`, producing at most `k` centroids (fewer when `n < k`).
///
/// Iterations stop at `max_iters` or when the largest centroid movement
/// falls below epsilon.
///
/// # Errors
///
/// Returns `TrainingFailed` when no centroid can be produced.
pub(crate) fn train(data: &[f32], n: usize, dim: usize, k: usize, max_iters: usize) -> Result<Vec<Vec<f32>>> {
    if n == 0 || k == 0 {
        return Err(Error::TrainingFailed(format!(
            "cannot train {k} centroids from {n} vectors"
        )));
    }
    let k = k.min(n);
    let row = |i: usize| &data[i * dim..(i + 1) * dim];
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);

    // k-means++ seeding: subsequent centroids are drawn proportionally to
    // the squared distance from the nearest already-chosen centroid.
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(row(rng.next_below(n)).to_vec());
    let mut nearest_sq: Vec<f32> = (0..n)
        .map(|i| simd::squared_l2(row(i), &centroids[0]))
        .collect();
    while centroids.len() < k {
        let total: f32 = nearest_sq.iter().sum();
        let chosen = if total <= f32::EPSILON {
            // All points coincide with a centroid; fall back to uniform.
            rng.next_below(n)
        } else {
            let mut target = rng.next_f32() * total;
            let mut pick = n - 1;
            for (i, &d) in nearest_sq.iter().enumerate() {
                target -= d;
                if target <= 0.0 {
                    pick = i;
                    break;
                }
            }
            pick
        };
        let centroid = row(chosen).to_vec();
        for i in 0..n {
            nearest_sq[i] = nearest_sq[i].min(simd::squared_l2(row(i), &centroid));
        }
        centroids.push(centroid);
    }

    // Lloyd iterations with a parallel assignment step.
    for iter in 0..max_iters {
        let assignments: Vec<usize> = (0..n)
            .into_par_iter()
            .map(|i| nearest_centroid(row(i), &centroids).0)
            .collect();

        let mut sums = vec![vec![0.0f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (i, &c) in assignments.iter().enumerate() {
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(row(i)) {
                *s += v;
            }
        }

        let mut movement = 0.0f32;
        for (c, centroid) in centroids.iter_mut().enumerate() {
            if counts[c] == 0 {
                // Empty cluster: keep the previous centroid.
                continue;
            }
            let inv = 1.0 / counts[c] as f32;
            let updated: Vec<f32> = sums[c].iter().map(|s| s * inv).collect();
            movement = movement.max(simd::squared_l2(centroid, &updated));
            *centroid = updated;
        }

        if movement < MOVEMENT_EPS {
            tracing::debug!(iter, movement, "k-means converged early");
            break;
        }
    }

    Ok(centroids)
}

/// Index and squared distance of the closest centroid.
#[inline]
pub(crate) fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> (usize, f32) {
    let mut best = 0usize;
    let mut best_dist = f32::MAX;
    for (i, centroid) in centroids.iter().enumerate() {
        let dist = simd::squared_l2(vector, centroid);
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    (best, best_dist)
}
