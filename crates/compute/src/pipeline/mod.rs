//! Anomaly scoring pipeline orchestrator.
//!
//! Owns the observation store, the model registry and the alert manager, and
//! runs the scoring stages against them:
//!
//! - **Scorers** (any order, each re-runnable): statistical, partition, reconstruction.
//! - **Combine**: weighted vote of the three scorer flags.
//! - **Pattern**: spike detection crossed with the combined score.
//! - **Alerts**: prioritization, re-binarization and feedback over the result.

pub mod alerts;
pub mod cancel;
pub mod combine;
pub mod metrics;
pub mod partition;
pub mod pattern;
pub mod reconstruction;
pub mod registry;
pub mod stage;
pub mod statistical;

use tracing::{info, warn};

use marketwatch_core::config::{
    CombineConfig, PartitionConfig, PatternConfig, ReconstructionConfig, StatisticalConfig,
};
use marketwatch_core::{Config, DetectError, Observation};

use crate::store::ObservationStore;

use self::alerts::{Alert, AlertAction, AlertManager, AlertState, FeedbackRecord};
use self::cancel::CancelToken;
use self::combine::CombineStage;
use self::metrics::PipelineMetrics;
use self::partition::PartitionStage;
use self::pattern::PatternStage;
use self::reconstruction::ReconstructionStage;
use self::registry::ModelRegistry;
use self::stage::{Stage, StageReport};
use self::statistical::StatisticalStage;

/// Everything a [`Stage`] may read or commit to.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub(crate) store: ObservationStore,
    pub(crate) registry: ModelRegistry,
    pub(crate) alerts: AlertManager,
}

impl PipelineState {
    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }
}

pub struct Pipeline {
    state: PipelineState,
    config: Config,
    metrics: PipelineMetrics,
}

impl Pipeline {
    /// Validate `config`, ingest the batch and start with an empty registry.
    pub fn new(observations: Vec<Observation>, config: Config) -> Result<Self, DetectError> {
        config.validate()?;
        let store = ObservationStore::ingest(observations)?;

        info!(
            rows = store.len(),
            features = ?store.feature_names().collect::<Vec<_>>(),
            profile = config.profile_label(),
            "pipeline created"
        );

        Ok(Self {
            state: PipelineState {
                store,
                registry: ModelRegistry::new(),
                alerts: AlertManager::new(config.alerts.threshold),
            },
            config,
            metrics: PipelineMetrics::default(),
        })
    }

    /// Run one stage to completion.
    pub fn run(&mut self, stage: &dyn Stage) -> Result<StageReport, DetectError> {
        self.run_with_cancel(stage, &CancelToken::new())
    }

    pub fn run_with_cancel(&mut self, stage: &dyn Stage, cancel: &CancelToken) -> Result<StageReport, DetectError> {
        match stage.execute(&mut self.state, cancel) {
            Ok(report) => {
                info!(
                    stage = %report.stage,
                    rows = report.rows,
                    flagged = report.flagged,
                    duration_ms = report.duration.as_millis() as u64,
                    summary = report.summary.as_deref().unwrap_or(""),
                    "stage completed"
                );
                self.metrics.record_stage(&report);
                Ok(report)
            }
            Err(e) => {
                warn!(stage = stage.name(), error = %e, "stage failed");
                self.metrics.record_failure(stage.name());
                Err(e)
            }
        }
    }

    pub fn score_statistical(&mut self, config: &StatisticalConfig) -> Result<StageReport, DetectError> {
        self.run(&StatisticalStage::new(config.clone()))
    }

    /// Fit the isolation forest. Dismissed false positives are left out of
    /// training when `alerts.exclude_dismissed_from_training` is set.
    pub fn score_partition(&mut self, config: &PartitionConfig) -> Result<StageReport, DetectError> {
        let exclude = self.config.alerts.exclude_dismissed_from_training;
        self.run(&PartitionStage::new(config.clone(), exclude))
    }

    pub fn score_reconstruction(
        &mut self,
        config: &ReconstructionConfig,
        cancel: &CancelToken,
    ) -> Result<StageReport, DetectError> {
        let exclude = self.config.alerts.exclude_dismissed_from_training;
        self.run_with_cancel(&ReconstructionStage::new(config.clone(), exclude), cancel)
    }

    pub fn combine(&mut self, config: &CombineConfig) -> Result<StageReport, DetectError> {
        self.run(&CombineStage::new(config.weights))
    }

    pub fn correlate(&mut self, config: &PatternConfig) -> Result<StageReport, DetectError> {
        self.run(&PatternStage::new(config.clone()))
    }

    /// Every stage in dependency order, configured from the pipeline config.
    /// Stops at the first failure.
    pub fn run_all(&mut self, cancel: &CancelToken) -> Result<Vec<StageReport>, DetectError> {
        let cfg = self.config.clone();
        let exclude = cfg.alerts.exclude_dismissed_from_training;
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(StatisticalStage::new(cfg.statistical)),
            Box::new(PartitionStage::new(cfg.partition, exclude)),
            Box::new(ReconstructionStage::new(cfg.reconstruction, exclude)),
            Box::new(CombineStage::new(cfg.combine.weights)),
            Box::new(PatternStage::new(cfg.pattern)),
        ];

        let mut reports = Vec::with_capacity(stages.len());
        for stage in &stages {
            reports.push(self.run_with_cancel(stage.as_ref(), cancel)?);
        }
        Ok(reports)
    }

    /// Alerts above `threshold`, most anomalous first.
    pub fn prioritize(&mut self, threshold: f64) -> Result<Vec<Alert>, DetectError> {
        let alerts = self.state.alerts.prioritize(&self.state.store, threshold)?;
        self.metrics.record_alerts_served(alerts.len());
        Ok(alerts)
    }

    /// Overwrite `anomaly_score` with 0/1 at `threshold`.
    pub fn rebinarize(&mut self, threshold: f64) -> Result<usize, DetectError> {
        let ones = alerts::rebinarize(&mut self.state.store, threshold)?;
        self.metrics.record_rebinarize();
        Ok(ones)
    }

    pub fn record_feedback(&mut self, alert_id: usize, action: AlertAction) -> Result<FeedbackRecord, DetectError> {
        let record = self.state.alerts.record_feedback(&self.state.store, alert_id, action)?;
        self.metrics.record_feedback();
        Ok(record)
    }

    pub fn alert_state(&self, id: usize) -> Result<AlertState, DetectError> {
        self.state.alerts.alert_state(&self.state.store, id)
    }

    pub fn store(&self) -> &ObservationStore {
        self.state.store()
    }

    pub fn registry(&self) -> &ModelRegistry {
        self.state.registry()
    }

    pub fn alerts(&self) -> &AlertManager {
        self.state.alerts()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
}
