//! Columnar observation store.
//!
//! Holds the ingested observations (timestamps plus one column per feature)
//! and every derived per-observation column the scoring stages produce.
//! Each derived column is `None` until its producing stage has committed.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use marketwatch_core::{DetectError, Observation};

/// Names under which derived columns can be read back.
pub mod columns {
    pub const Z_SCORE: &str = "z_score";
    pub const ANOMALY_STAT: &str = "anomaly_stat";
    pub const PARTITION_SCORE: &str = "partition_score";
    pub const ANOMALY_PARTITION: &str = "anomaly_partition";
    pub const RECONSTRUCTION_ERROR: &str = "reconstruction_error";
    pub const ANOMALY_RECONSTRUCTION: &str = "anomaly_reconstruction";
    pub const ANOMALY_SCORE: &str = "anomaly_score";
    pub const SPIKE_FLAG: &str = "spike_flag";
    pub const PATTERN_ALERT: &str = "pattern_alert";

    pub const ALL: [&str; 9] = [
        Z_SCORE,
        ANOMALY_STAT,
        PARTITION_SCORE,
        ANOMALY_PARTITION,
        RECONSTRUCTION_ERROR,
        ANOMALY_RECONSTRUCTION,
        ANOMALY_SCORE,
        SPIKE_FLAG,
        PATTERN_ALERT,
    ];
}

/// Derived per-observation fields. Flags are stored as 0/1 bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedColumns {
    pub z_score: Option<Vec<f64>>,
    pub anomaly_stat: Option<Vec<u8>>,
    pub partition_score: Option<Vec<f64>>,
    pub anomaly_partition: Option<Vec<u8>>,
    pub reconstruction_error: Option<Vec<f64>>,
    pub anomaly_reconstruction: Option<Vec<u8>>,
    pub anomaly_score: Option<Vec<f64>>,
    pub spike_flag: Option<Vec<u8>>,
    pub pattern_alert: Option<Vec<f64>>,
}

fn flags_as_f64(flags: &Option<Vec<u8>>) -> Option<Vec<f64>> {
    flags.as_ref().map(|v| v.iter().map(|&f| f as f64).collect())
}

#[derive(Debug, Clone)]
pub struct ObservationStore {
    timestamps: Vec<DateTime<Utc>>,
    features: IndexMap<String, Vec<f64>>,
    derived: DerivedColumns,
}

impl ObservationStore {
    /// Validate and ingest a batch.
    ///
    /// The batch must be non-empty, strictly increasing in time, share one
    /// feature set (taken from the first observation), and hold only finite
    /// values.
    pub fn ingest(observations: Vec<Observation>) -> Result<Self, DetectError> {
        let first = observations
            .first()
            .ok_or_else(|| DetectError::InvalidObservations("batch is empty".to_string()))?;

        let names: Vec<String> = first.features.keys().cloned().collect();
        if names.is_empty() {
            return Err(DetectError::InvalidObservations(
                "observations carry no features".to_string(),
            ));
        }

        let mut timestamps = Vec::with_capacity(observations.len());
        let mut features: IndexMap<String, Vec<f64>> = names
            .iter()
            .map(|n| (n.clone(), Vec::with_capacity(observations.len())))
            .collect();

        for (i, obs) in observations.into_iter().enumerate() {
            if let Some(prev) = timestamps.last() {
                if obs.timestamp <= *prev {
                    return Err(DetectError::InvalidObservations(format!(
                        "timestamp at position {} ({}) is not after its predecessor ({})",
                        i, obs.timestamp, prev
                    )));
                }
            }
            if obs.features.len() != names.len() {
                return Err(DetectError::InvalidObservations(format!(
                    "observation {} has {} features, expected {}",
                    i,
                    obs.features.len(),
                    names.len()
                )));
            }
            for (name, column) in features.iter_mut() {
                let value = obs.feature(name).ok_or_else(|| {
                    DetectError::InvalidObservations(format!(
                        "observation {} is missing feature '{}'",
                        i, name
                    ))
                })?;
                if !value.is_finite() {
                    return Err(DetectError::InvalidObservations(format!(
                        "observation {} has non-finite '{}' ({})",
                        i, name, value
                    )));
                }
                column.push(value);
            }
            timestamps.push(obs.timestamp);
        }

        Ok(Self {
            timestamps,
            features,
            derived: DerivedColumns::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.timestamps.get(index).copied()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(|k| k.as_str())
    }

    pub fn feature(&self, name: &str) -> Option<&[f64]> {
        self.features.get(name).map(|v| v.as_slice())
    }

    /// Like [`feature`](Self::feature) but fails with `InsufficientFeatures`.
    pub fn require_feature(&self, name: &str) -> Result<&[f64], DetectError> {
        self.feature(name).ok_or_else(|| {
            DetectError::InsufficientFeatures(format!(
                "feature '{}' not present (available: {})",
                name,
                self.feature_names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Resolve several feature columns; at least one must be requested.
    pub fn require_features(&self, names: &[String]) -> Result<Vec<&[f64]>, DetectError> {
        if names.is_empty() {
            return Err(DetectError::InsufficientFeatures(
                "no features requested".to_string(),
            ));
        }
        names.iter().map(|n| self.require_feature(n)).collect()
    }

    /// Rebuild the observation at `index`.
    pub fn observation(&self, index: usize) -> Option<Observation> {
        let timestamp = self.timestamp(index)?;
        let mut obs = Observation::new(timestamp);
        for (name, column) in &self.features {
            obs = obs.with_feature(name, column[index]);
        }
        Some(obs)
    }

    pub fn derived(&self) -> &DerivedColumns {
        &self.derived
    }

    pub(crate) fn derived_mut(&mut self) -> &mut DerivedColumns {
        &mut self.derived
    }

    /// Read a derived or raw feature column by name as `f64`.
    ///
    /// Returns `None` for unknown names and for derived columns that have
    /// not been computed yet.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let d = &self.derived;
        match name {
            columns::Z_SCORE => d.z_score.clone(),
            columns::ANOMALY_STAT => flags_as_f64(&d.anomaly_stat),
            columns::PARTITION_SCORE => d.partition_score.clone(),
            columns::ANOMALY_PARTITION => flags_as_f64(&d.anomaly_partition),
            columns::RECONSTRUCTION_ERROR => d.reconstruction_error.clone(),
            columns::ANOMALY_RECONSTRUCTION => flags_as_f64(&d.anomaly_reconstruction),
            columns::ANOMALY_SCORE => d.anomaly_score.clone(),
            columns::SPIKE_FLAG => flags_as_f64(&d.spike_flag),
            columns::PATTERN_ALERT => d.pattern_alert.clone(),
            other => self.feature(other).map(|v| v.to_vec()),
        }
    }

    /// Names of derived columns computed so far.
    pub fn computed_columns(&self) -> Vec<&'static str> {
        columns::ALL
            .iter()
            .copied()
            .filter(|c| self.column(c).is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn obs(hour: i64, volume: f64, price: f64) -> Observation {
        let base = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        Observation::new(base + Duration::hours(hour))
            .with_feature("volume", volume)
            .with_feature("price", price)
    }

    #[test]
    fn ingest_builds_columns() {
        let store = ObservationStore::ingest(vec![obs(0, 10.0, 1.0), obs(1, 20.0, 2.0)]).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.feature("volume"), Some(&[10.0, 20.0][..]));
        assert_eq!(store.feature_names().collect::<Vec<_>>(), vec!["volume", "price"]);
        assert!(store.computed_columns().is_empty());
    }

    #[test]
    fn ingest_rejects_empty_batch() {
        let err = ObservationStore::ingest(vec![]).unwrap_err();
        assert!(matches!(err, DetectError::InvalidObservations(_)));
    }

    #[test]
    fn ingest_rejects_duplicate_or_backwards_timestamps() {
        let dup = ObservationStore::ingest(vec![obs(1, 1.0, 1.0), obs(1, 2.0, 2.0)]);
        assert!(matches!(dup, Err(DetectError::InvalidObservations(_))));

        let back = ObservationStore::ingest(vec![obs(2, 1.0, 1.0), obs(1, 2.0, 2.0)]);
        assert!(matches!(back, Err(DetectError::InvalidObservations(_))));
    }

    #[test]
    fn ingest_rejects_mismatched_feature_sets() {
        let base = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let odd = Observation::new(base + Duration::hours(1))
            .with_feature("volume", 1.0)
            .with_feature("spread", 0.1);
        let err = ObservationStore::ingest(vec![obs(0, 1.0, 1.0), odd]).unwrap_err();
        assert!(matches!(err, DetectError::InvalidObservations(_)));
    }

    #[test]
    fn ingest_rejects_non_finite_values() {
        let err = ObservationStore::ingest(vec![obs(0, f64::NAN, 1.0)]).unwrap_err();
        assert!(matches!(err, DetectError::InvalidObservations(_)));
    }

    #[test]
    fn require_feature_reports_insufficient_features() {
        let store = ObservationStore::ingest(vec![obs(0, 1.0, 1.0)]).unwrap();
        let err = store.require_feature("spread").unwrap_err();
        assert!(matches!(err, DetectError::InsufficientFeatures(_)));
        assert!(store.require_features(&[]).is_err());
    }

    #[test]
    fn column_reads_flags_and_raw_features() {
        let mut store = ObservationStore::ingest(vec![obs(0, 1.0, 5.0), obs(1, 2.0, 6.0)]).unwrap();
        assert_eq!(store.column("anomaly_stat"), None);

        store.derived_mut().anomaly_stat = Some(vec![0, 1]);
        assert_eq!(store.column("anomaly_stat"), Some(vec![0.0, 1.0]));
        assert_eq!(store.column("price"), Some(vec![5.0, 6.0]));
        assert_eq!(store.column("nonexistent"), None);
        assert_eq!(store.computed_columns(), vec!["anomaly_stat"]);
    }

    #[test]
    fn observation_roundtrip() {
        let store = ObservationStore::ingest(vec![obs(0, 1.0, 5.0), obs(1, 2.0, 6.0)]).unwrap();
        assert_eq!(store.observation(1), Some(obs(1, 2.0, 6.0)));
        assert_eq!(store.observation(2), None);
    }
}
