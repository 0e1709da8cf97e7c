pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod trainer;
pub mod utils;

pub use error::{Error, Result};
