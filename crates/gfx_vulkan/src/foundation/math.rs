//! Float comparison helpers used by dynamic-state caching

use approx::relative_eq;

/// Returns `true` when `a` and `b` differ by more than rounding noise.
///
/// Dynamic-state setters use this instead of `!=` so values that only differ
/// in the last ulp do not trigger another driver call.
#[inline]
pub fn is_not_equal_f(a: f32, b: f32) -> bool {
    !relative_eq!(a, b, epsilon = f32::EPSILON, max_relative = f32::EPSILON)
}

/// Component-wise [`is_not_equal_f`] over two slices of equal length
#[inline]
pub fn any_not_equal_f(a: &[f32], b: &[f32]) -> bool {
    a.len() != b.len() || a.iter().zip(b).any(|(x, y)| is_not_equal_f(*x, *y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_values() {
        assert!(!is_not_equal_f(1.0, 1.0));
        assert!(!is_not_equal_f(0.0, 0.0));
    }

    #[test]
    fn test_rounding_noise_is_ignored() {
        let a = 0.1_f32 + 0.2_f32;
        let b = 0.3_f32;
        assert!(!is_not_equal_f(a, b));
    }

    #[test]
    fn test_real_difference_detected() {
        assert!(is_not_equal_f(1.0, 1.001));
        assert!(is_not_equal_f(0.0, 0.5));
    }

    #[test]
    fn test_slices() {
        assert!(!any_not_equal_f(&[1.0, 2.0], &[1.0, 2.0]));
        assert!(any_not_equal_f(&[1.0, 2.0], &[1.0, 2.5]));
        assert!(any_not_equal_f(&[1.0], &[1.0, 2.0]));
    }
}
