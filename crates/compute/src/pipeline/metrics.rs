use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::stage::StageReport;

/// Bookkeeping for one stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageMetrics {
    /// When the stage last completed successfully.
    pub last_run: Option<DateTime<Utc>>,
    /// Duration of the last successful run in milliseconds.
    pub last_duration_ms: u64,
    /// Rows processed in the last successful run.
    pub rows: usize,
    /// Rows flagged in the last successful run.
    pub flagged: usize,
    pub runs: u64,
    pub failures: u64,
}

/// Pipeline performance metrics, updated after every stage and alert action.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    /// Per-stage metrics keyed by stage name.
    pub stages: BTreeMap<String, StageMetrics>,
    /// Alerts returned by the last prioritization.
    pub alerts_last_served: usize,
    /// Feedback actions recorded so far.
    pub feedback_recorded: u64,
    /// Rebinarizations applied so far.
    pub rebinarizations: u64,
}

impl PipelineMetrics {
    /// Record completion of a stage.
    pub fn record_stage(&mut self, report: &StageReport) {
        let entry = self.stages.entry(report.stage.clone()).or_default();
        entry.last_run = Some(Utc::now());
        entry.last_duration_ms = report.duration.as_millis() as u64;
        entry.rows = report.rows;
        entry.flagged = report.flagged;
        entry.runs += 1;
    }

    /// Record a failed stage run. Previous success figures are kept.
    pub fn record_failure(&mut self, stage: &str) {
        self.stages.entry(stage.to_owned()).or_default().failures += 1;
    }

    pub fn record_alerts_served(&mut self, count: usize) {
        self.alerts_last_served = count;
    }

    pub fn record_feedback(&mut self) {
        self.feedback_recorded += 1;
    }

    pub fn record_rebinarize(&mut self) {
        self.rebinarizations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report(stage: &str, ms: u64) -> StageReport {
        StageReport {
            stage: stage.to_string(),
            duration: Duration::from_millis(ms),
            rows: 100,
            flagged: 3,
            summary: None,
        }
    }

    #[test]
    fn stage_metrics_accumulate_runs() {
        let mut m = PipelineMetrics::default();
        m.record_stage(&report("statistical", 5));
        m.record_stage(&report("statistical", 7));

        let s = &m.stages["statistical"];
        assert_eq!(s.runs, 2);
        assert_eq!(s.last_duration_ms, 7);
        assert_eq!(s.flagged, 3);
        assert!(s.last_run.is_some());
    }

    #[test]
    fn failures_do_not_reset_success_metrics() {
        let mut m = PipelineMetrics::default();
        m.record_stage(&report("reconstruction", 200));
        m.record_failure("reconstruction");

        let s = &m.stages["reconstruction"];
        assert_eq!(s.runs, 1);
        assert_eq!(s.failures, 1);
        assert_eq!(s.last_duration_ms, 200);
    }

    #[test]
    fn alert_counters() {
        let mut m = PipelineMetrics::default();
        m.record_alerts_served(12);
        m.record_feedback();
        m.record_rebinarize();
        assert_eq!(m.alerts_last_served, 12);
        assert_eq!(m.feedback_recorded, 1);
        assert_eq!(m.rebinarizations, 1);
    }
}
