pub mod algorithms;
pub mod pipeline;
pub mod sample;
pub mod store;

pub use pipeline::alerts::{Alert, AlertAction, AlertManager, AlertState, FeedbackRecord};
pub use pipeline::cancel::CancelToken;
pub use pipeline::metrics::{PipelineMetrics, StageMetrics};
pub use pipeline::registry::{FittedModel, ModelRegistry, ScorerKind};
pub use pipeline::stage::{Stage, StageReport};
pub use pipeline::{Pipeline, PipelineState};
pub use sample::generate_sample_data;
pub use store::{columns, DerivedColumns, ObservationStore};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Duration;
    use marketwatch_core::Observation;

    use crate::sample::start_time;
    use crate::store::ObservationStore;

    pub fn observations_from_pairs(pairs: &[(f64, f64)]) -> Vec<Observation> {
        let start = start_time();
        pairs
            .iter()
            .enumerate()
            .map(|(i, (volume, price))| {
                Observation::new(start + Duration::hours(i as i64))
                    .with_feature("volume", *volume)
                    .with_feature("price", *price)
            })
            .collect()
    }

    /// Store with `volume` and `price` columns.
    pub fn store_from_pairs(pairs: &[(f64, f64)]) -> ObservationStore {
        ObservationStore::ingest(observations_from_pairs(pairs)).unwrap()
    }

    /// Store with a single `volume` column.
    pub fn store_from_volumes(volumes: &[f64]) -> ObservationStore {
        let start = start_time();
        let observations = volumes
            .iter()
            .enumerate()
            .map(|(i, v)| Observation::new(start + Duration::hours(i as i64)).with_feature("volume", *v))
            .collect();
        ObservationStore::ingest(observations).unwrap()
    }
}
