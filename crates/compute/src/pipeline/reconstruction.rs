//! Reconstruction scorer: autoencoder error against a percentile threshold.

use std::time::Instant;

use tracing::{debug, info};

use marketwatch_core::config::ReconstructionConfig;
use marketwatch_core::DetectError;

use crate::algorithms::autoencoder::{Autoencoder, TrainParams, TrainingReport};
use crate::algorithms::scaler::StandardScaler;
use crate::algorithms::stats::percentile;
use crate::store::ObservationStore;

use super::cancel::CancelToken;
use super::registry::FittedModel;
use super::stage::{Stage, StageReport};
use super::PipelineState;

pub const STAGE_NAME: &str = "reconstruction";

/// Registry entry for the reconstruction scorer.
#[derive(Debug, Clone)]
pub struct ReconstructionModel {
    pub scaler: StandardScaler,
    pub autoencoder: Autoencoder,
    pub report: TrainingReport,
    /// Error above which an observation is flagged.
    pub threshold: f64,
    pub percentile: f64,
    /// Rows the network was trained on.
    pub trained_rows: usize,
}

/// Train an autoencoder and write `reconstruction_error` / `anomaly_reconstruction`.
///
/// The threshold is the configured percentile of this batch's errors, so
/// it adapts per dataset. Nothing is written unless training finishes with
/// a finite loss.
pub fn fit_score(
    store: &mut ObservationStore,
    config: &ReconstructionConfig,
    training_rows: Option<&[usize]>,
    cancel: &CancelToken,
) -> Result<ReconstructionModel, DetectError> {
    if !(config.percentile > 0.0 && config.percentile < 100.0) {
        return Err(DetectError::InvalidParameter(format!(
            "percentile must be in (0, 100), got {}",
            config.percentile
        )));
    }

    let n = store.len();
    if n < 2 {
        return Err(DetectError::InsufficientFeatures(format!(
            "reconstruction scoring needs at least 2 observations, got {}",
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
    if train.is_empty() {
        return Err(DetectError::InsufficientFeatures(
            "reconstruction training set is empty".to_string(),
        ));
    }

    let params = TrainParams {
        hidden_layers: config.hidden_layers.clone(),
        epochs: config.epochs,
        learning_rate: config.learning_rate,
        batch_size: config.batch_size,
        seed: config.seed,
    };
    let (autoencoder, report) = Autoencoder::train(train, &params, cancel)?;
    let trained_rows = train.len();

    let errors = autoencoder.reconstruction_errors(&rows);
    let threshold = percentile(&errors, config.percentile)
        .filter(|t| t.is_finite())
        .ok_or(DetectError::TrainingDiverged {
            epochs: config.epochs,
            loss: f64::NAN,
        })?;
    let flags: Vec<u8> = errors.iter().map(|e| u8::from(*e > threshold)).collect();

    debug!(
        final_loss = report.final_loss,
        threshold,
        percentile = config.percentile,
        "reconstruction errors computed"
    );

    let derived = store.derived_mut();
    derived.reconstruction_error = Some(errors);
    derived.anomaly_reconstruction = Some(flags);

    Ok(ReconstructionModel {
        scaler,
        autoencoder,
        report,
        threshold,
        percentile: config.percentile,
        trained_rows,
    })
}

/// [`fit_score`] as a pipeline stage; replaces the registry's reconstruction entry.
pub struct ReconstructionStage {
    pub config: ReconstructionConfig,
    /// Train without observations dismissed as false positives.
    pub exclude_dismissed: bool,
}

impl ReconstructionStage {
    pub fn new(config: ReconstructionConfig, exclude_dismissed: bool) -> Self {
        Self {
            config,
            exclude_dismissed,
        }
    }
}

impl Stage for ReconstructionStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn execute(&self, state: &mut PipelineState, cancel: &CancelToken) -> Result<StageReport, DetectError> {
        let start = Instant::now();

        let training = if self.exclude_dismissed {
            state.alerts.training_rows(state.store.len())
        } else {
            None
        };
        if let Some(rows) = &training {
            info!(
                excluded = state.store.len() - rows.len(),
                "reconstruction training excludes dismissed false positives"
            );
        }

        let model = fit_score(&mut state.store, &self.config, training.as_deref(), cancel)?;
        let summary = format!(
            "{} epochs on {} rows, final loss {:.4}, p{} threshold {:.4}",
            self.config.epochs, model.trained_rows, model.report.final_loss, model.percentile, model.threshold
        );
        state.registry.insert(FittedModel::Reconstruction(model));

        let flagged = state
            .store
            .derived()
            .anomaly_reconstruction
            .as_ref()
            .map(|f| f.iter().filter(|&&v| v == 1).count())
            .unwrap_or(0);

        Ok(StageReport {
            stage: STAGE_NAME.to_string(),
            duration: start.elapsed(),
            rows: state.store.len(),
            flagged,
            summary: Some(summary),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::store_from_pairs;

    fn config(epochs: usize) -> ReconstructionConfig {
        ReconstructionConfig {
            epochs,
            hidden_layers: vec![16, 8, 16],
            learning_rate: 1e-2,
            ..ReconstructionConfig::default()
        }
    }

    fn distinct_pairs(n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                (1000.0 + (t * 0.37).sin() * 200.0 + t * 0.01, 100.0 + (t * 0.11).cos() * 10.0)
            })
            .collect()
    }

    #[test]
    fn flags_top_five_percent() {
        let mut store = store_from_pairs(&distinct_pairs(200));
        let model = fit_score(&mut store, &config(5), None, &CancelToken::new()).unwrap();

        let errors = store.derived().reconstruction_error.clone().unwrap();
        let flags = store.derived().anomaly_reconstruction.clone().unwrap();
        let flagged = flags.iter().filter(|&&f| f == 1).count();
        assert!((9..=10).contains(&flagged), "flagged {flagged}");

        for (e, f) in errors.iter().zip(&flags) {
            assert_eq!(*f == 1, *e > model.threshold);
        }
        assert_eq!(model.report.epoch_losses.len(), 5);
        assert_eq!(model.autoencoder.layer_sizes(), vec![2, 16, 8, 16, 2]);
    }

    #[test]
    fn divergence_leaves_store_untouched() {
        let mut store = store_from_pairs(&distinct_pairs(64));
        let cfg = ReconstructionConfig {
            learning_rate: 1e300,
            ..config(3)
        };
        let err = fit_score(&mut store, &cfg, None, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, DetectError::TrainingDiverged { .. }));
        assert!(store.derived().reconstruction_error.is_none());
        assert!(store.derived().anomaly_reconstruction.is_none());
    }

    #[test]
    fn cancellation_leaves_store_untouched() {
        let mut store = store_from_pairs(&distinct_pairs(64));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = fit_score(&mut store, &config(3), None, &cancel).unwrap_err();
        assert!(matches!(err, DetectError::Cancelled(_)));
        assert!(store.derived().anomaly_reconstruction.is_none());
    }

    #[test]
    fn missing_feature_is_insufficient() {
        let mut store = store_from_pairs(&distinct_pairs(10));
        let cfg = ReconstructionConfig {
            features: vec!["spread".to_string()],
            ..config(1)
        };
        let err = fit_score(&mut store, &cfg, None, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, DetectError::InsufficientFeatures(_)));
    }

    #[test]
    fn invalid_percentile_rejected() {
        let mut store = store_from_pairs(&distinct_pairs(10));
        let cfg = ReconstructionConfig {
            percentile: 100.0,
            ..config(1)
        };
        let err = fit_score(&mut store, &cfg, None, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, DetectError::InvalidParameter(_)));
    }
}
