//! Training configuration, loadable from TOML.
//!
//! ```toml
//! epochs = 2
//! batch_size = 4
//! learning_rate = 0.001
//! momentum = 0.9
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    /// Dataset cache directory.
    pub data_dir: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub learning_rate: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    /// Dropout probability of the deep variant.
    pub dropout: f32,
    pub seed: u64,
    /// Mini-batches between running-loss log lines.
    pub log_interval: usize,
    pub train_limit: Option<usize>,
    pub test_limit: Option<usize>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            epochs: 2,
            batch_size: 4,
            eval_batch_size: 100,
            learning_rate: 0.001,
            momentum: 0.9,
            weight_decay: 0.0,
            dropout: 0.25,
            seed: 42,
            log_interval: 2000,
            train_limit: None,
            test_limit: None,
        }
    }
}

impl TrainConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be positive".to_string()));
        }
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            return Err(Error::Config("batch sizes must be positive".to_string()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::Config(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::Config("weight decay must not be negative".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.log_interval == 0 {
            return Err(Error::Config("log interval must be positive".to_string()));
        }
        Ok(())
    }
}
