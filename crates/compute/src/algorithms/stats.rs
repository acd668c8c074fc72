//! Batch statistics shared by the scorers.
//!
//! Mean, standard deviation (sample and population) and linear-interpolation
//! percentiles over plain `f64` slices.

/// Arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator). Returns 0.0 for fewer than 2 values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Population standard deviation (n denominator). Returns 0.0 for an empty slice.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile `q` in [0, 100], interpolating linearly between closest ranks.
///
/// Returns `None` for an empty slice or if any value is NaN.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_basic() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn sample_vs_population_std() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_std_dev(&data) - 2.0).abs() < 1e-12);
        // sqrt(32 / 7)
        assert!((sample_std_dev(&data) - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn std_of_single_value_is_zero() {
        assert_eq!(sample_std_dev(&[3.0]), 0.0);
        assert_eq!(population_std_dev(&[3.0]), 0.0);
    }

    #[test]
    fn percentile_interpolates() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&data, 0.0), Some(1.0));
        assert_eq!(percentile(&data, 50.0), Some(3.0));
        assert_eq!(percentile(&data, 100.0), Some(5.0));
        // rank 0.95 * 4 = 3.8 -> 4 + 0.8 * (5 - 4)
        assert!((percentile(&data, 95.0).unwrap() - 4.8).abs() < 1e-12);
    }

    #[test]
    fn percentile_ignores_input_order() {
        let a = percentile(&[5.0, 1.0, 4.0, 2.0, 3.0], 25.0);
        let b = percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 25.0);
        assert_eq!(a, b);
    }

    #[test]
    fn percentile_rejects_empty_and_nan() {
        assert_eq!(percentile(&[], 95.0), None);
        assert_eq!(percentile(&[1.0, f64::NAN], 95.0), None);
    }
}
