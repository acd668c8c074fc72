use std::time::Duration;

use serde::Serialize;

use marketwatch_core::DetectError;

use super::cancel::CancelToken;
use super::PipelineState;

/// Outcome of one stage run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// Name of the stage that produced this report.
    pub stage: String,
    /// Wall time of the stage, including model fitting.
    pub duration: Duration,
    /// Observations processed.
    pub rows: usize,
    /// Observations the stage flagged (anomalies, spikes, or non-zero scores).
    pub flagged: usize,
    /// Optional human-readable summary.
    pub summary: Option<String>,
}

/// A unit of pipeline work.
///
/// Implementations compute into local buffers and commit their own output
/// columns (and registry entry, if any) only when they succeed, so a failed
/// or cancelled stage leaves the state exactly as it found it.
pub trait Stage {
    /// Human-readable name for logging and metrics.
    fn name(&self) -> &str;

    /// Run against the pipeline state.
    fn execute(&self, state: &mut PipelineState, cancel: &CancelToken) -> Result<StageReport, DetectError>;
}
