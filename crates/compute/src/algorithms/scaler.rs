use serde::{Deserialize, Serialize};

use super::stats::{mean, population_std_dev};

/// Per-feature standardization parameters (zero mean, unit variance).
///
/// Constant features keep a scale of 1.0 so they map to 0 instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub features: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl StandardScaler {
    /// Fit on column-major data: `columns[j]` holds every value of `features[j]`.
    pub fn fit(features: &[String], columns: &[&[f64]]) -> Self {
        let means: Vec<f64> = columns.iter().map(|c| mean(c)).collect();
        let scales: Vec<f64> = columns
            .iter()
            .map(|c| {
                let s = population_std_dev(c);
                if s <= f64::EPSILON { 1.0 } else { s }
            })
            .collect();

        Self {
            features: features.to_vec(),
            means,
            scales,
        }
    }

    /// Transform column-major data into standardized row vectors.
    pub fn transform(&self, columns: &[&[f64]]) -> Vec<Vec<f64>> {
        let rows = columns.first().map(|c| c.len()).unwrap_or(0);
        (0..rows)
            .map(|i| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(j, col)| (col[i] - self.means[j]) / self.scales[j])
                    .collect()
            })
            .collect()
    }

    pub fn fit_transform(features: &[String], columns: &[&[f64]]) -> (Self, Vec<Vec<f64>>) {
        let scaler = Self::fit(features, columns);
        let rows = scaler.transform(columns);
        (scaler, rows)
    }

    pub fn dim(&self) -> usize {
        self.means.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn standardizes_to_zero_mean_unit_variance() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [10.0, 10.0, 30.0, 30.0];
        let (scaler, rows) = StandardScaler::fit_transform(&names(&["a", "b"]), &[&a, &b]);

        assert_eq!(scaler.dim(), 2);
        assert_eq!(rows.len(), 4);
        for j in 0..2 {
            let col: Vec<f64> = rows.iter().map(|r| r[j]).collect();
            let m = mean(&col);
            let s = population_std_dev(&col);
            assert!(m.abs() < 1e-12);
            assert!((s - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn constant_feature_maps_to_zero() {
        let a = [5.0, 5.0, 5.0];
        let (scaler, rows) = StandardScaler::fit_transform(&names(&["a"]), &[&a]);
        assert_eq!(scaler.scales, vec![1.0]);
        assert!(rows.iter().all(|r| r[0] == 0.0));
    }
}
