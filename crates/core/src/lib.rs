pub mod config;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod targeting;
pub mod types;

pub use config::AppConfig;
pub use error::{AdsError, AdsResult};
