//! Pattern correlator: sudden magnitude spikes crossed with the ensemble score.

use std::time::Instant;

use tracing::debug;

use marketwatch_core::config::PatternConfig;
use marketwatch_core::DetectError;

use crate::store::{columns, ObservationStore};

use super::cancel::CancelToken;
use super::stage::{Stage, StageReport};
use super::PipelineState;

pub const STAGE_NAME: &str = "pattern";

/// `1` where a value exceeds `multiplier` times its predecessor. The first
/// value has no predecessor and is never a spike.
pub fn spike_flags(values: &[f64], multiplier: f64) -> Vec<u8> {
    let mut flags = Vec::with_capacity(values.len());
    if !values.is_empty() {
        flags.push(0);
    }
    flags.extend(values.windows(2).map(|w| u8::from(w[1] > multiplier * w[0])));
    flags
}

/// Write `spike_flag` and `pattern_alert = anomaly_score * spike_flag`.
///
/// Returns the number of rows with a non-zero pattern alert.
pub fn correlate(store: &mut ObservationStore, feature: &str, multiplier: f64) -> Result<usize, DetectError> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(DetectError::InvalidParameter(format!(
            "spike_multiplier must be a finite value > 0, got {}",
            multiplier
        )));
    }

    let scores = store
        .derived()
        .anomaly_score
        .as_ref()
        .ok_or_else(|| DetectError::missing(columns::ANOMALY_SCORE))?;
    let values = store.require_feature(feature)?;

    let spikes = spike_flags(values, multiplier);
    let alerts: Vec<f64> = scores.iter().zip(&spikes).map(|(s, &f)| s * f as f64).collect();
    let raised = alerts.iter().filter(|a| **a > 0.0).count();

    debug!(
        feature,
        multiplier,
        spikes = spikes.iter().filter(|&&f| f == 1).count(),
        raised,
        "pattern correlation done"
    );

    let derived = store.derived_mut();
    derived.spike_flag = Some(spikes);
    derived.pattern_alert = Some(alerts);
    Ok(raised)
}

pub struct PatternStage {
    pub config: PatternConfig,
}

impl PatternStage {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }
}

impl Stage for PatternStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn execute(&self, state: &mut PipelineState, _cancel: &CancelToken) -> Result<StageReport, DetectError> {
        let start = Instant::now();
        let raised = correlate(&mut state.store, &self.config.feature, self.config.spike_multiplier)?;

        Ok(StageReport {
            stage: STAGE_NAME.to_string(),
            duration: start.elapsed(),
            rows: state.store.len(),
            flagged: raised,
            summary: Some(format!(
                "{} spikes above {}x on '{}' coincide with anomalies",
                raised, self.config.spike_multiplier, self.config.feature
            )),
        })
    }
}
