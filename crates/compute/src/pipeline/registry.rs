//! Fitted model state, one entry per model-backed scorer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::algorithms::scaler::StandardScaler;
use crate::store::columns;

use super::partition::PartitionModel;
use super::reconstruction::ReconstructionModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScorerKind {
    Statistical,
    Partition,
    Reconstruction,
}

impl ScorerKind {
    pub const ALL: [ScorerKind; 3] = [
        ScorerKind::Statistical,
        ScorerKind::Partition,
        ScorerKind::Reconstruction,
    ];

    /// The binary flag column this scorer writes.
    pub fn flag_column(self) -> &'static str {
        match self {
            ScorerKind::Statistical => columns::ANOMALY_STAT,
            ScorerKind::Partition => columns::ANOMALY_PARTITION,
            ScorerKind::Reconstruction => columns::ANOMALY_RECONSTRUCTION,
        }
    }
}

impl fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScorerKind::Statistical => write!(f, "statistical"),
            ScorerKind::Partition => write!(f, "partition"),
            ScorerKind::Reconstruction => write!(f, "reconstruction"),
        }
    }
}

/// Fitted state of one scorer.
#[derive(Debug, Clone)]
pub enum FittedModel {
    Partition(PartitionModel),
    Reconstruction(ReconstructionModel),
}

impl FittedModel {
    pub fn kind(&self) -> ScorerKind {
        match self {
            FittedModel::Partition(_) => ScorerKind::Partition,
            FittedModel::Reconstruction(_) => ScorerKind::Reconstruction,
        }
    }

    pub fn scaler(&self) -> &StandardScaler {
        match self {
            FittedModel::Partition(m) => &m.scaler,
            FittedModel::Reconstruction(m) => &m.scaler,
        }
    }
}

/// Owned by the pipeline. Re-fitting a scorer replaces its entry.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<ScorerKind, FittedModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fitted model, returning the one it replaced.
    pub(crate) fn insert(&mut self, model: FittedModel) -> Option<FittedModel> {
        self.entries.insert(model.kind(), model)
    }

    pub fn get(&self, kind: ScorerKind) -> Option<&FittedModel> {
        self.entries.get(&kind)
    }

    pub fn partition(&self) -> Option<&PartitionModel> {
        match self.entries.get(&ScorerKind::Partition) {
            Some(FittedModel::Partition(m)) => Some(m),
            _ => None,
        }
    }

    pub fn reconstruction(&self) -> Option<&ReconstructionModel> {
        match self.entries.get(&ScorerKind::Reconstruction) {
            Some(FittedModel::Reconstruction(m)) => Some(m),
            _ => None,
        }
    }

    pub fn kinds(&self) -> Vec<ScorerKind> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scorer_kind_display_and_columns() {
        assert_eq!(ScorerKind::Partition.to_string(), "partition");
        assert_eq!(ScorerKind::Statistical.flag_column(), "anomaly_stat");
        assert_eq!(ScorerKind::Reconstruction.flag_column(), "anomaly_reconstruction");
    }

    #[test]
    fn empty_registry() {
        let registry = ModelRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.partition().is_none());
        assert!(registry.get(ScorerKind::Statistical).is_none());
    }
}
