//! Distance metrics for vector similarity calculations.

use serde::{Deserialize, Serialize};

use crate::simd;

/// Distance metric for vector similarity calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceKind {
    /// Squared Euclidean distance (L2²). Best for spatial data.
    SquaredEuclidean,

    /// Cosine distance `1 - cos(a, b)`. Best for text embeddings;
    /// zero-norm inputs yield a distance of 1.0.
    Cosine,

    /// Signed dot product (inner product). Results order by the raw value,
    /// larger meaning more similar.
    Dot,

    /// Hamming distance: the count of differing components.
    Hamming,
}

impl DistanceKind {
    /// Calculates the distance between two vectors using this metric.
    ///
    /// This is the scalar conformance path; all index implementations and
    /// tests are defined against it.
    ///
    /// # Panics
    ///
    /// Panics if the vectors have different dimensions.
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "vector dimensions must match");
        match self {
            Self::SquaredEuclidean => simd::squared_l2(a, b),
            Self::Cosine => simd::cosine_distance(a, b),
            Self::Dot => simd::dot(a, b),
            Self::Hamming => simd::hamming(a, b),
        }
    }

    /// SIMD-accelerated variant of [`Self::distance`]. Falls back to the
    /// scalar path for metrics without an accelerated kernel, or when the
    /// crate is built without the `simd` feature.
    #[must_use]
    pub fn distance_accel(&self, a: &[f32], b: &[f32]) -> f32 {
        #[cfg(feature = "simd")]
        {
            assert_eq!(a.len(), b.len(), "vector dimensions must match");
            match self {
                Self::SquaredEuclidean => simd::accel::squared_l2(a, b),
                Self::Cosine => simd::accel::cosine_distance(a, b),
                Self::Dot => simd::accel::dot(a, b),
                Self::Hamming => simd::hamming(a, b),
            }
        }
        #[cfg(not(feature = "simd"))]
        {
            self.distance(a, b)
        }
    }

    /// Returns whether higher raw values indicate more similarity.
    #[must_use]
    pub const fn higher_is_better(&self) -> bool {
        matches!(self, Self::Dot)
    }

    /// Ordering key such that smaller always means closer, for any metric.
    #[inline]
    #[must_use]
    pub fn order_key(&self, raw: f32) -> f32 {
        if self.higher_is_better() {
            -raw
        } else {
            raw
        }
    }

    /// Sorts `(row, raw_distance)` results from most to least similar.
    pub fn sort_results(&self, results: &mut [(u64, f32)]) {
        if self.higher_is_better() {
            results.sort_by(|a, b| b.1.total_cmp(&a.1));
        } else {
            results.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
    }

    /// Transforms a raw distance into a similarity in a metric-appropriate
    /// way, used for linear score combination in hybrid search.
    #[must_use]
    pub fn similarity(&self, raw: f32) -> f32 {
        match self {
            Self::Cosine => 1.0 - raw,
            Self::SquaredEuclidean | Self::Hamming => 1.0 / (1.0 + raw),
            Self::Dot => raw,
        }
    }

    /// Stable numeric tag used by the on-disk format.
    #[must_use]
    pub const fn tag(&self) -> u32 {
        match self {
            Self::SquaredEuclidean => 0,
            Self::Cosine => 1,
            Self::Dot => 2,
            Self::Hamming => 3,
        }
    }

    /// Inverse of [`Self::tag`].
    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::SquaredEuclidean),
            1 => Some(Self::Cosine),
            2 => Some(Self::Dot),
            3 => Some(Self::Hamming),
            _ => None,
        }
    }
}
