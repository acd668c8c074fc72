//! Statistical scorer: z-score of one feature against the batch mean.

use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use marketwatch_core::config::StatisticalConfig;
use marketwatch_core::DetectError;

use crate::algorithms::stats::{mean, sample_std_dev};
use crate::store::ObservationStore;

use super::cancel::CancelToken;
use super::stage::{Stage, StageReport};
use super::PipelineState;

pub const STAGE_NAME: &str = "statistical";

/// Batch statistics behind the z-scores of the last run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatisticalSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub flagged: usize,
}

/// Write `z_score` and `anomaly_stat` for `feature`.
///
/// `z = (value - mean) / sample_std_dev` over the whole batch, and the flag
/// is set iff `|z| > z_threshold`. A constant column has no deviation, so
/// every z-score is 0.
pub fn score(
    store: &mut ObservationStore,
    feature: &str,
    z_threshold: f64,
) -> Result<StatisticalSummary, DetectError> {
    if !z_threshold.is_finite() || z_threshold < 0.0 {
        return Err(DetectError::InvalidParameter(format!(
            "z_threshold must be a finite value >= 0, got {}",
            z_threshold
        )));
    }

    let values = store.require_feature(feature)?;
    if values.len() < 2 {
        return Err(DetectError::EmptyDataset {
            required: 2,
            actual: values.len(),
        });
    }

    let m = mean(values);
    let sd = sample_std_dev(values);

    let z_scores: Vec<f64> = if sd <= f64::EPSILON {
        vec![0.0; values.len()]
    } else {
        values.iter().map(|v| (v - m) / sd).collect()
    };
    let flags: Vec<u8> = z_scores.iter().map(|z| u8::from(z.abs() > z_threshold)).collect();
    let flagged = flags.iter().filter(|&&f| f == 1).count();

    debug!(feature, mean = m, std_dev = sd, flagged, "z-scores computed");

    let derived = store.derived_mut();
    derived.z_score = Some(z_scores);
    derived.anomaly_stat = Some(flags);

    Ok(StatisticalSummary {
        mean: m,
        std_dev: sd,
        flagged,
    })
}

/// [`score`] as a pipeline stage. Persists nothing in the registry.
pub struct StatisticalStage {
    pub config: StatisticalConfig,
}

impl StatisticalStage {
    pub fn new(config: StatisticalConfig) -> Self {
        Self { config }
    }
}

impl Stage for StatisticalStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn execute(&self, state: &mut PipelineState, _cancel: &CancelToken) -> Result<StageReport, DetectError> {
        let start = Instant::now();
        let summary = score(&mut state.store, &self.config.feature, self.config.z_threshold)?;

        Ok(StageReport {
            stage: STAGE_NAME.to_string(),
            duration: start.elapsed(),
            rows: state.store.len(),
            flagged: summary.flagged,
            summary: Some(format!(
                "{}: mean={:.2}, std={:.2}, {} beyond {} sd",
                self.config.feature, summary.mean, summary.std_dev, summary.flagged, self.config.z_threshold
            )),
        })
    }
}
