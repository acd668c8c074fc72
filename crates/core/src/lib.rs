pub mod config;
pub mod error;
pub mod observation;

pub use config::Config;
pub use error::*;
pub use observation::*;
