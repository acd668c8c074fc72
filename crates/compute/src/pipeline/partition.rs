//! Partition scorer: isolation forest over standardized features.

use std::time::Instant;

use tracing::{debug, info};

use marketwatch_core::config::PartitionConfig;
use marketwatch_core::DetectError;

use crate::algorithms::isolation_forest::{flag_top, ForestParams, IsolationForest};
use crate::algorithms::scaler::StandardScaler;
use crate::store::ObservationStore;

use super::cancel::CancelToken;
use super::registry::FittedModel;
use super::stage::{Stage, StageReport};
use super::PipelineState;

pub const STAGE_NAME: &str = "partition";

/// Registry entry for the partition scorer.
#[derive(Debug, Clone)]
pub struct PartitionModel {
    pub scaler: StandardScaler,
    pub forest: IsolationForest,
    pub contamination: f64,
    /// Lowest isolation score that was still flagged.
    pub score_threshold: f64,
    /// Rows the forest was fitted on.
    pub trained_rows: usize,
}

/// Fit an isolation forest and write `partition_score` / `anomaly_partition`.
///
/// The `round(contamination * n)` highest-scoring observations (at least
/// one) are flagged. When `training_rows` is given, only those rows are
/// used to grow the trees; every row is still scored.
pub fn fit_score(
    store: &mut ObservationStore,
    config: &PartitionConfig,
    training_rows: Option<&[usize]>,
) -> Result<PartitionModel, DetectError> {
    if !(config.contamination > 0.0 && config.contamination <= 0.5) {
        return Err(DetectError::InvalidParameter(format!(
            "contamination must be in (0, 0.5], got {}",
            config.contamination
        )));
    }
    if config.n_trees == 0 {
        return Err(DetectError::InvalidParameter("n_trees must be >= 1".to_string()));
    }

    let n = store.len();
    if n < 2 {
        return Err(DetectError::InsufficientFeatures(format!(
            "partition scoring needs at least 2 observations, got {}",
            n
        )));
    }

    let columns = store.require_features(&config.features)?;
    let (scaler, rows) = StandardScaler::fit_transform(&config.features, &columns);

    let subset: Vec<Vec<f64>>;
    let train: &[Vec<f64>] = match training_rows {
        Some(indices) => {
            subset = indices.iter().filter(|&&i| i < n).map(|&i| rows[i].clone()).collect();
            &subset
        }
        None => &rows,
    };
    if train.len() < 2 {
        return Err(DetectError::InsufficientFeatures(format!(
            "partition training needs at least 2 rows, got {}",
            train.len()
        )));
    }

    let params = ForestParams {
        n_trees: config.n_trees,
        max_samples: config.max_samples,
        seed: config.seed,
    };
    let forest = IsolationForest::fit(train, &params);
    let trained_rows = train.len();
    let scores = forest.score_samples(&rows);

    let count = ((config.contamination * n as f64).round() as usize).clamp(1, n);
    let flags = flag_top(&scores, count);
    let score_threshold = scores
        .iter()
        .zip(&flags)
        .filter(|(_, f)| **f == 1)
        .map(|(s, _)| *s)
        .fold(f64::INFINITY, f64::min);

    debug!(
        trees = config.n_trees,
        sample_size = forest.sample_size(),
        flagged = count,
        score_threshold,
        "isolation forest scored"
    );

    let derived = store.derived_mut();
    derived.partition_score = Some(scores);
    derived.anomaly_partition = Some(flags);

    Ok(PartitionModel {
        scaler,
        forest,
        contamination: config.contamination,
        score_threshold,
        trained_rows,
    })
}

/// [`fit_score`] as a pipeline stage; replaces the registry's partition entry.
pub struct PartitionStage {
    pub config: PartitionConfig,
    /// Grow trees without observations dismissed as false positives.
    pub exclude_dismissed: bool,
}

impl PartitionStage {
    pub fn new(config: PartitionConfig, exclude_dismissed: bool) -> Self {
        Self {
            config,
            exclude_dismissed,
        }
    }
}

impl Stage for PartitionStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn execute(&self, state: &mut PipelineState, _cancel: &CancelToken) -> Result<StageReport, DetectError> {
        let start = Instant::now();

        let training = if self.exclude_dismissed {
            state.alerts.training_rows(state.store.len())
        } else {
            None
        };
        if let Some(rows) = &training {
            info!(
                excluded = state.store.len() - rows.len(),
                "partition training excludes dismissed false positives"
            );
        }

        let model = fit_score(&mut state.store, &self.config, training.as_deref())?;
        let tree_count = model.forest.trees().len();
        let trained_rows = model.trained_rows;
        state.registry.insert(FittedModel::Partition(model));

        let flagged_rows = state
            .store
            .derived()
            .anomaly_partition
            .as_ref()
            .map(|f| f.iter().filter(|&&v| v == 1).count())
            .unwrap_or(0);

        Ok(StageReport {
            stage: STAGE_NAME.to_string(),
            duration: start.elapsed(),
            rows: state.store.len(),
            flagged: flagged_rows,
            summary: Some(format!(
                "{} trees fitted on {} rows, contamination {}",
                tree_count, trained_rows, self.config.contamination
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::store_from_pairs;

    fn config(contamination: f64) -> PartitionConfig {
        PartitionConfig {
            n_trees: 50,
            contamination,
            ..PartitionConfig::default()
        }
    }

    fn pairs_with_outliers() -> Vec<(f64, f64)> {
        let mut pairs: Vec<(f64, f64)> = (0..100)
            .map(|i| (1000.0 + ((i * 7) % 13) as f64 * 10.0, 100.0 + ((i * 3) % 7) as f64))
            .collect();
        pairs[20] = (9000.0, 100.0);
        pairs[60] = (1000.0, 400.0);
        pairs
    }

    #[test]
    fn flags_contamination_fraction() {
        let mut store = store_from_pairs(&pairs_with_outliers());
        let model = fit_score(&mut store, &config(0.1), None).unwrap();

        let flags = store.derived().anomaly_partition.clone().unwrap();
        assert_eq!(flags.iter().filter(|&&f| f == 1).count(), 10);
        assert!(flags.iter().all(|&f| f <= 1));
        assert_eq!(flags[20], 1);
        assert_eq!(flags[60], 1);
        assert_eq!(model.trained_rows, 100);
        assert_eq!(model.scaler.features, vec!["volume".to_string(), "price".to_string()]);
    }

    #[test]
    fn flagged_rows_have_the_highest_scores() {
        let mut store = store_from_pairs(&pairs_with_outliers());
        let model = fit_score(&mut store, &config(0.05), None).unwrap();
        let scores = store.derived().partition_score.clone().unwrap();
        let flags = store.derived().anomaly_partition.clone().unwrap();

        for (s, f) in scores.iter().zip(&flags) {
            if *f == 0 {
                assert!(*s <= model.score_threshold);
            } else {
                assert!(*s >= model.score_threshold);
            }
        }
    }

    #[test]
    fn reproducible_with_seed() {
        let mut a = store_from_pairs(&pairs_with_outliers());
        let mut b = store_from_pairs(&pairs_with_outliers());
        fit_score(&mut a, &config(0.1), None).unwrap();
        fit_score(&mut b, &config(0.1), None).unwrap();
        assert_eq!(a.derived().partition_score, b.derived().partition_score);
    }

    #[test]
    fn training_subset_still_scores_every_row() {
        let mut store = store_from_pairs(&pairs_with_outliers());
        let keep: Vec<usize> = (0..100).filter(|&i| i != 20).collect();
        let model = fit_score(&mut store, &config(0.1), Some(&keep)).unwrap();
        assert_eq!(model.trained_rows, 99);
        assert_eq!(store.derived().partition_score.as_ref().unwrap().len(), 100);
    }

    #[test]
    fn rejects_bad_contamination_without_writing() {
        let mut store = store_from_pairs(&pairs_with_outliers());
        let err = fit_score(&mut store, &config(0.0), None).unwrap_err();
        assert!(matches!(err, DetectError::InvalidParameter(_)));
        assert!(store.derived().anomaly_partition.is_none());
    }

    #[test]
    fn missing_feature_or_single_row_is_insufficient() {
        let mut store = store_from_pairs(&pairs_with_outliers());
        let cfg = PartitionConfig {
            features: vec!["volume".to_string(), "spread".to_string()],
            ..config(0.1)
        };
        let err = fit_score(&mut store, &cfg, None).unwrap_err();
        assert!(matches!(err, DetectError::InsufficientFeatures(_)));

        let mut tiny = store_from_pairs(&[(1.0, 2.0)]);
        let err = fit_score(&mut tiny, &config(0.1), None).unwrap_err();
        assert!(matches!(err, DetectError::InsufficientFeatures(_)));
    }
}
