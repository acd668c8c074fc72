use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("Dataset too small: {required} observations required, got {actual}")]
    EmptyDataset { required: usize, actual: usize },

    #[error("Insufficient features: {0}")]
    InsufficientFeatures(String),

    #[error("Training diverged after {epochs} epoch(s): loss is {loss}")]
    TrainingDiverged { epochs: usize, loss: f64 },

    #[error("Missing input column(s): {}", .0.join(", "))]
    MissingInput(Vec<String>),

    #[error("Invalid observations: {0}")]
    InvalidObservations(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Alert not found: {0}")]
    UnknownAlert(usize),

    #[error("Observation {id} is not alerted at threshold {threshold}")]
    NotAlerted { id: usize, threshold: f64 },

    #[error("Alert {0} already has a recorded action")]
    AlertClosed(usize),

    #[error("Config error: {0}")]
    Config(String),
}

impl DetectError {
    /// Shorthand for a single missing column.
    pub fn missing(column: &str) -> Self {
        DetectError::MissingInput(vec![column.to_string()])
    }
}

pub type DetectResult<T> = Result<T, DetectError>;
