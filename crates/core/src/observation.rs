use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One time step: a unique timestamp and a fixed set of named numeric features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub features: IndexMap<String, f64>,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            features: IndexMap::new(),
        }
    }

    /// Builder-style feature insertion.
    pub fn with_feature(mut self, name: &str, value: f64) -> Self {
        self.features.insert(name.to_string(), value);
        self
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }
}
