pub mod autoencoder;
pub mod isolation_forest;
pub mod scaler;
pub mod stats;
