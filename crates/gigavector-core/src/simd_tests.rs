use super::simd;

#[test]
fn test_dot_scalar() {
    let a = vec![1.0, 2.0, 3.0];
    let b = vec![4.0, 5.0, 6.0];
    assert!((simd::dot(&a, &b) - 32.0).abs() < 1e-6);
}

#[test]
fn test_squared_l2_scalar() {
    let a = vec![1.0, 2.0];
    let b = vec![4.0, 6.0];
    assert!((simd::squared_l2(&a, &b) - 25.0).abs() < 1e-6);
}

#[test]
fn test_normalize_inplace() {
    let mut v = vec![3.0, 4.0];
    simd::normalize_inplace(&mut v);
    assert!((simd::norm(&v) - 1.0).abs() < 1e-6);

    let mut zero = vec![0.0, 0.0];
    simd::normalize_inplace(&mut zero);
    assert_eq!(zero, vec![0.0, 0.0]);
}

#[test]
fn test_hamming_bitwise_equality() {
    // -0.0 and +0.0 have different bit patterns and count as differing.
    let a = vec![0.0f32];
    let b = vec![-0.0f32];
    assert_eq!(simd::hamming(&a, &b), 1.0);
}

#[cfg(feature = "simd")]
mod accel {
    use crate::simd;

    #[test]
    fn test_accel_dot_with_tail() {
        // 19 elements: two full 8-lane chunks plus a 3-element tail.
        let a: Vec<f32> = (0..19).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..19).map(|i| (i * 2) as f32).collect();
        let scalar = simd::dot(&a, &b);
        let fast = simd::accel::dot(&a, &b);
        assert!((scalar - fast).abs() < 1e-3);
    }

    #[test]
    fn test_accel_cosine_zero_norm() {
        let a = vec![0.0f32; 16];
        let b: Vec<f32> = (0..16).map(|i| i as f32).collect();
        assert!((simd::accel::cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }
}
