pub mod config;
pub mod error;
pub mod metrics;
pub mod plate_detection;
pub mod session;
pub mod utils;
