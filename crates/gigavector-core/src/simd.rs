//! Distance kernels: scalar reference implementations plus optional SIMD.
//!
//! The scalar functions in this module are the conformance implementations:
//! every index and every test is defined against them. The `accel`
//! submodule provides `wide`-based SIMD variants that are only reached when
//! a config explicitly opts in (e.g. `FlatConfig::use_simd`), so enabling
//! SIMD can never change result ordering for code that did not ask for it.

/// Dot product of two equal-length slices (scalar reference).
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = 0.0f32;
    for i in 0..a.len() {
        acc += a[i] * b[i];
    }
    acc
}

/// Squared Euclidean distance (scalar reference).
#[inline]
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = 0.0f32;
    for i in 0..a.len() {
        let d = a[i] - b[i];
        acc += d * d;
    }
    acc
}

/// Euclidean norm of a slice.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Cosine distance `1 - a·b / (‖a‖‖b‖)`. Zero-norm inputs yield 1.0.
#[inline]
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / (norm_a * norm_b)
}

/// Hamming distance: the number of component positions where `a` and `b`
/// differ, as a float.
#[inline]
#[must_use]
pub fn hamming(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut count = 0u32;
    for i in 0..a.len() {
        if a[i].to_bits() != b[i].to_bits() {
            count += 1;
        }
    }
    count as f32
}

/// Normalizes a vector to unit norm in place. Zero vectors are left as-is.
pub fn normalize_inplace(v: &mut [f32]) {
    let n = norm(v);
    if n > 0.0 {
        for x in v.iter_mut() {
            *x /= n;
        }
    }
}

/// SIMD-accelerated kernels built on `wide::f32x8`.
///
/// Lane-parallel accumulation reorders floating point additions, so these
/// are numerically close to (not bit-identical with) the scalar reference.
/// Callers opt in per config; nothing routes here by default.
#[cfg(feature = "simd")]
pub mod accel {
    use wide::f32x8;

    const LANES: usize = 8;

    #[inline]
    fn chunks(a: &[f32], b: &[f32]) -> (usize, usize) {
        debug_assert_eq!(a.len(), b.len());
        let full = a.len() / LANES * LANES;
        (full, a.len())
    }

    /// Dot product with 8-wide lanes and a scalar tail.
    #[inline]
    #[must_use]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        let (full, len) = chunks(a, b);
        let mut acc = f32x8::ZERO;
        let mut i = 0;
        while i < full {
            let va = f32x8::from(&a[i..i + LANES]);
            let vb = f32x8::from(&b[i..i + LANES]);
            acc = va.mul_add(vb, acc);
            i += LANES;
        }
        let mut sum = acc.reduce_add();
        while i < len {
            sum += a[i] * b[i];
            i += 1;
        }
        sum
    }

    /// Squared Euclidean distance with 8-wide lanes and a scalar tail.
    #[inline]
    #[must_use]
    pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
        let (full, len) = chunks(a, b);
        let mut acc = f32x8::ZERO;
        let mut i = 0;
        while i < full {
            let d = f32x8::from(&a[i..i + LANES]) - f32x8::from(&b[i..i + LANES]);
            acc = d.mul_add(d, acc);
            i += LANES;
        }
        let mut sum = acc.reduce_add();
        while i < len {
            let d = a[i] - b[i];
            sum += d * d;
            i += 1;
        }
        sum
    }

    /// Cosine distance with fused norm/dot accumulation.
    #[inline]
    #[must_use]
    pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
        let (full, len) = chunks(a, b);
        let mut acc_ab = f32x8::ZERO;
        let mut acc_aa = f32x8::ZERO;
        let mut acc_bb = f32x8::ZERO;
        let mut i = 0;
        while i < full {
            let va = f32x8::from(&a[i..i + LANES]);
            let vb = f32x8::from(&b[i..i + LANES]);
            acc_ab = va.mul_add(vb, acc_ab);
            acc_aa = va.mul_add(va, acc_aa);
            acc_bb = vb.mul_add(vb, acc_bb);
            i += LANES;
        }
        let mut ab = acc_ab.reduce_add();
        let mut aa = acc_aa.reduce_add();
        let mut bb = acc_bb.reduce_add();
        while i < len {
            ab += a[i] * b[i];
            aa += a[i] * a[i];
            bb += b[i] * b[i];
            i += 1;
        }
        let denom = aa.sqrt() * bb.sqrt();
        if denom == 0.0 {
            return 1.0;
        }
        1.0 - ab / denom
    }
}
