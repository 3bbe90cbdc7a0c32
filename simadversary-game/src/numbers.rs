//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

/// Ceil a f64 and clamp it to the i64 range, returning 0 for non-finite values.
#[must_use]
pub fn ceil_f64_to_i64(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let min = cast::<i64, f64>(i64::MIN).unwrap_or(f64::MIN);
    let max = cast::<i64, f64>(i64::MAX).unwrap_or(f64::MAX);
    let clamped = value.clamp(min, max).ceil();
    cast::<f64, i64>(clamped).unwrap_or(0)
}

/// Floor a f64 and clamp it to the i64 range, returning 0 for non-finite values.
#[must_use]
pub fn floor_f64_to_i64(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let min = cast::<i64, f64>(i64::MIN).unwrap_or(f64::MIN);
    let max = cast::<i64, f64>(i64::MAX).unwrap_or(f64::MAX);
    let clamped = value.clamp(min, max).floor();
    cast::<f64, i64>(clamped).unwrap_or(0)
}

/// Ceil a f64 and clamp it to the i32 range, returning 0 for non-finite values.
#[must_use]
pub fn ceil_f64_to_i32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    let min = f64::from(i32::MIN);
    let max = f64::from(i32::MAX);
    let clamped = value.clamp(min, max).ceil();
    cast::<f64, i32>(clamped).unwrap_or(0)
}

/// Convert i64 to f64 while allowing precision loss in a single location.
#[must_use]
pub fn i64_to_f64(value: i64) -> f64 {
    cast::<i64, f64>(value).unwrap_or(0.0)
}

/// Convert a count to f64 for averaging.
#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    cast::<usize, f64>(value).unwrap_or(0.0)
}

/// Convert a duration in seconds to f64.
#[must_use]
pub fn u64_to_f64(value: u64) -> f64 {
    cast::<u64, f64>(value).unwrap_or(0.0)
}

/// Convert a u32 counter into an i64 ledger value.
#[must_use]
pub fn u32_to_i64(value: u32) -> i64 {
    i64::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_clamps_and_handles_nan() {
        assert_eq!(ceil_f64_to_i64(1.2), 2);
        assert_eq!(ceil_f64_to_i64(-1.2), -1);
        assert_eq!(ceil_f64_to_i64(f64::NAN), 0);
        assert_eq!(ceil_f64_to_i32(f64::INFINITY), 0);
        assert_eq!(ceil_f64_to_i32(f64::from(i32::MAX) * 2.0), i32::MAX);
    }

    #[test]
    fn floor_rounds_down() {
        assert_eq!(floor_f64_to_i64(12.9), 12);
        assert_eq!(floor_f64_to_i64(-0.5), -1);
        assert_eq!(floor_f64_to_i64(f64::NEG_INFINITY), 0);
    }

    #[test]
    fn conversions_are_lossless_for_small_values() {
        assert!((i64_to_f64(42) - 42.0).abs() < f64::EPSILON);
        assert!((usize_to_f64(7) - 7.0).abs() < f64::EPSILON);
        assert!((u64_to_f64(5_400) - 5_400.0).abs() < f64::EPSILON);
        assert_eq!(u32_to_i64(u32::MAX), 4_294_967_295);
    }
}
