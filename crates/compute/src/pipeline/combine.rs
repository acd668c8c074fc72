//! Score combiner: weighted vote of the three scorer flags.

use std::time::Instant;

use tracing::debug;

use marketwatch_core::config::SignalWeights;
use marketwatch_core::DetectError;

use crate::store::{columns, ObservationStore};

use super::cancel::CancelToken;
use super::stage::{Stage, StageReport};
use super::PipelineState;

pub const STAGE_NAME: &str = "combine";

fn check_weights(weights: &SignalWeights) -> Result<(), DetectError> {
    let all = [weights.statistical, weights.partition, weights.reconstruction];
    if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(DetectError::InvalidParameter(format!(
            "combine weights must be finite and >= 0, got {:?}",
            all
        )));
    }
    if weights.total() <= 0.0 {
        return Err(DetectError::InvalidParameter(
            "combine weights must not all be zero".to_string(),
        ));
    }
    Ok(())
}

/// Write `anomaly_score = Σ wᵢ·flagᵢ / Σ wᵢ`.
///
/// With the default equal weights this is the plain mean of the three
/// flags. Returns the number of rows with a non-zero score.
pub fn combine(store: &mut ObservationStore, weights: &SignalWeights) -> Result<usize, DetectError> {
    check_weights(weights)?;

    let d = store.derived();
    let (stat, partition, reconstruction) = match (
        d.anomaly_stat.as_ref(),
        d.anomaly_partition.as_ref(),
        d.anomaly_reconstruction.as_ref(),
    ) {
        (Some(s), Some(p), Some(r)) => (s, p, r),
        (s, p, r) => {
            let missing = [
                (s.is_none(), columns::ANOMALY_STAT),
                (p.is_none(), columns::ANOMALY_PARTITION),
                (r.is_none(), columns::ANOMALY_RECONSTRUCTION),
            ]
            .iter()
            .filter(|(absent, _)| *absent)
            .map(|(_, name)| name.to_string())
            .collect();
            return Err(DetectError::MissingInput(missing));
        }
    };

    let total = weights.total();
    let scores: Vec<f64> = stat
        .iter()
        .zip(partition)
        .zip(reconstruction)
        .map(|((&s, &p), &r)| {
            (weights.statistical * s as f64 + weights.partition * p as f64 + weights.reconstruction * r as f64)
                / total
        })
        .collect();
    let nonzero = scores.iter().filter(|s| **s > 0.0).count();

    debug!(nonzero, total_weight = total, "anomaly scores combined");

    store.derived_mut().anomaly_score = Some(scores);
    Ok(nonzero)
}

pub struct CombineStage {
    pub weights: SignalWeights,
}

impl CombineStage {
    pub fn new(weights: SignalWeights) -> Self {
        Self { weights }
    }
}

impl Stage for CombineStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn execute(&self, state: &mut PipelineState, _cancel: &CancelToken) -> Result<StageReport, DetectError> {
        let start = Instant::now();
        let nonzero = combine(&mut state.store, &self.weights)?;

        Ok(StageReport {
            stage: STAGE_NAME.to_string(),
            duration: start.elapsed(),
            rows: state.store.len(),
            flagged: nonzero,
            summary: Some(format!("{} observations with a non-zero anomaly score", nonzero)),
        })
    }
}
