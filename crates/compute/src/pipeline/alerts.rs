//! Alert lifecycle: prioritization, re-binarization and investigator feedback.
//!
//! An alert is a view over the store: any observation whose `anomaly_score`
//! exceeds the active threshold. Its id is the observation's position.
//! Feedback actions are terminal; once recorded they are never replaced.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use marketwatch_core::DetectError;

use crate::store::{columns, ObservationStore};

/// Investigator response to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertAction {
    Review,
    Escalate,
    #[serde(rename = "Dismiss as False Positive")]
    DismissFalsePositive,
}

impl AlertAction {
    pub const ALL: [AlertAction; 3] = [
        AlertAction::Review,
        AlertAction::Escalate,
        AlertAction::DismissFalsePositive,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AlertAction::Review => "Review",
            AlertAction::Escalate => "Escalate",
            AlertAction::DismissFalsePositive => "Dismiss as False Positive",
        }
    }
}

impl fmt::Display for AlertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AlertAction {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "review" => Ok(AlertAction::Review),
            "escalate" => Ok(AlertAction::Escalate),
            "dismiss" | "dismiss as false positive" | "false_positive" => Ok(AlertAction::DismissFalsePositive),
            _ => Err(DetectError::InvalidParameter(format!(
                "unknown alert action '{}' (expected one of: {})",
                s,
                AlertAction::ALL.map(|a| a.label()).join(", ")
            ))),
        }
    }
}

/// Where an observation sits in the alert lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertState {
    /// No combined score yet.
    Unscored,
    /// Scored, at or below the active threshold.
    Scored,
    /// Above the active threshold, no action recorded.
    Alerted,
    Reviewed,
    Escalated,
    DismissedFalsePositive,
}

impl From<AlertAction> for AlertState {
    fn from(action: AlertAction) -> Self {
        match action {
            AlertAction::Review => AlertState::Reviewed,
            AlertAction::Escalate => AlertState::Escalated,
            AlertAction::DismissFalsePositive => AlertState::DismissedFalsePositive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: usize,
    pub timestamp: DateTime<Utc>,
    pub anomaly_score: f64,
    /// Present once pattern correlation has run.
    pub pattern_alert: Option<f64>,
    pub action: Option<AlertAction>,
}

/// Acknowledgement of a recorded action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: Uuid,
    pub alert_id: usize,
    /// Timestamp of the alerted observation.
    pub timestamp: DateTime<Utc>,
    pub action: AlertAction,
    pub recorded_at: DateTime<Utc>,
    pub score_at_feedback: f64,
}

fn check_threshold(threshold: f64) -> Result<(), DetectError> {
    if threshold.is_finite() {
        Ok(())
    } else {
        Err(DetectError::InvalidParameter(format!(
            "threshold must be finite, got {}",
            threshold
        )))
    }
}

fn scores(store: &ObservationStore) -> Result<&[f64], DetectError> {
    store
        .derived()
        .anomaly_score
        .as_deref()
        .ok_or_else(|| DetectError::missing(columns::ANOMALY_SCORE))
}

/// Replace `anomaly_score` with `1.0` where it exceeds `threshold`, else `0.0`.
///
/// Destructive: the graded score is lost. Returns the number of ones.
pub fn rebinarize(store: &mut ObservationStore, threshold: f64) -> Result<usize, DetectError> {
    check_threshold(threshold)?;
    let binary: Vec<f64> = scores(store)?
        .iter()
        .map(|s| if *s > threshold { 1.0 } else { 0.0 })
        .collect();
    let ones = binary.iter().filter(|b| **b == 1.0).count();

    info!(threshold, alerted = ones, "anomaly scores re-binarized");
    store.derived_mut().anomaly_score = Some(binary);
    Ok(ones)
}

#[derive(Debug, Clone)]
pub struct AlertManager {
    active_threshold: f64,
    feedback: BTreeMap<usize, FeedbackRecord>,
}

impl AlertManager {
    pub fn new(threshold: f64) -> Self {
        Self {
            active_threshold: threshold,
            feedback: BTreeMap::new(),
        }
    }

    /// Threshold of the last prioritization (initially the configured one).
    pub fn active_threshold(&self) -> f64 {
        self.active_threshold
    }

    /// Observations with `anomaly_score > threshold`, highest score first,
    /// ties broken by earlier timestamp. `threshold` becomes the active one.
    pub fn prioritize(&mut self, store: &ObservationStore, threshold: f64) -> Result<Vec<Alert>, DetectError> {
        check_threshold(threshold)?;
        let scores = scores(store)?;
        let pattern = store.derived().pattern_alert.as_deref();
        let timestamps = store.timestamps();

        let mut alerts: Vec<Alert> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > threshold)
            .map(|(id, &anomaly_score)| Alert {
                id,
                timestamp: timestamps[id],
                anomaly_score,
                pattern_alert: pattern.map(|p| p[id]),
                action: self.action_for(id),
            })
            .collect();
        alerts.sort_by(|a, b| {
            b.anomaly_score
                .total_cmp(&a.anomaly_score)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        self.active_threshold = threshold;
        info!(threshold, alerts = alerts.len(), "alerts prioritized");
        Ok(alerts)
    }

    /// Attach a terminal action to an alerted observation.
    pub fn record_feedback(
        &mut self,
        store: &ObservationStore,
        alert_id: usize,
        action: AlertAction,
    ) -> Result<FeedbackRecord, DetectError> {
        let timestamp = store.timestamp(alert_id).ok_or(DetectError::UnknownAlert(alert_id))?;
        let score = scores(store)?[alert_id];
        if self.feedback.contains_key(&alert_id) {
            return Err(DetectError::AlertClosed(alert_id));
        }
        if score <= self.active_threshold {
            return Err(DetectError::NotAlerted {
                id: alert_id,
                threshold: self.active_threshold,
            });
        }

        let record = FeedbackRecord {
            feedback_id: Uuid::new_v4(),
            alert_id,
            timestamp,
            action,
            recorded_at: Utc::now(),
            score_at_feedback: score,
        };
        info!(
            alert_id,
            action = %action,
            feedback_id = %record.feedback_id,
            "alert feedback recorded"
        );
        self.feedback.insert(alert_id, record.clone());
        Ok(record)
    }

    pub fn alert_state(&self, store: &ObservationStore, id: usize) -> Result<AlertState, DetectError> {
        if id >= store.len() {
            return Err(DetectError::UnknownAlert(id));
        }
        if let Some(action) = self.action_for(id) {
            return Ok(action.into());
        }
        Ok(match store.derived().anomaly_score.as_deref() {
            None => AlertState::Unscored,
            Some(s) if s[id] > self.active_threshold => AlertState::Alerted,
            Some(_) => AlertState::Scored,
        })
    }

    pub fn feedback(&self) -> impl Iterator<Item = &FeedbackRecord> {
        self.feedback.values()
    }

    pub fn action_for(&self, id: usize) -> Option<AlertAction> {
        self.feedback.get(&id).map(|r| r.action)
    }

    /// Ids dismissed as false positives, ascending.
    pub fn dismissed(&self) -> Vec<usize> {
        self.feedback
            .values()
            .filter(|r| r.action == AlertAction::DismissFalsePositive)
            .map(|r| r.alert_id)
            .collect()
    }

    /// Rows to train on when dismissed observations are excluded, or `None`
    /// when nothing has been dismissed.
    pub fn training_rows(&self, n: usize) -> Option<Vec<usize>> {
        let dismissed = self.dismissed();
        if dismissed.is_empty() {
            return None;
        }
        Some((0..n).filter(|i| dismissed.binary_search(i).is_err()).collect())
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(0.5)
    }
}
