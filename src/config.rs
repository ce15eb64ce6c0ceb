//! Trainer configuration.
//!
//! Configuration is serde-serializable so runs can be driven from JSON files
//! and the exact parameter set can be dumped to the experiment-tracking sink
//! at run start. Invalid configurations are rejected up front by
//! [`TrainerConfig::validate`]; nothing downstream re-checks intervals.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MemSegError, MemSegResult};

/// Configuration for a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Total number of optimizer updates. The run length is defined by this
    /// step budget, not by epochs; the training source is restarted as many
    /// times as needed.
    #[serde(default = "default_num_training_steps")]
    pub num_training_steps: u64,

    /// Emit a progress line every this many steps (the first step always
    /// logs).
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,

    /// Run the evaluator every this many steps. Step 0 never evaluates; the
    /// final step of the budget always does.
    #[serde(default = "default_eval_interval")]
    pub eval_interval: u64,

    /// Weight of the L1 regression loss on the anomaly channel.
    #[serde(default = "default_l1_weight")]
    pub l1_weight: f64,

    /// Weight of the focal classification loss over both channels.
    #[serde(default = "default_focal_weight")]
    pub focal_weight: f64,

    /// Directory for checkpoints and score records.
    #[serde(default = "default_savedir")]
    pub savedir: PathBuf,
}

fn default_num_training_steps() -> u64 {
    1000
}

fn default_log_interval() -> u64 {
    1
}

fn default_eval_interval() -> u64 {
    100
}

fn default_l1_weight() -> f64 {
    0.6
}

fn default_focal_weight() -> f64 {
    0.4
}

fn default_savedir() -> PathBuf {
    PathBuf::from("saved_model")
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_training_steps: default_num_training_steps(),
            log_interval: default_log_interval(),
            eval_interval: default_eval_interval(),
            l1_weight: default_l1_weight(),
            focal_weight: default_focal_weight(),
            savedir: default_savedir(),
        }
    }
}

impl TrainerConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> MemSegResult<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Check configuration invariants. Fatal at startup; not recovered.
    pub fn validate(&self) -> MemSegResult<()> {
        if self.num_training_steps == 0 {
            return Err(MemSegError::invalid_config(
                "num_training_steps must be greater than zero",
            ));
        }
        if self.log_interval == 0 {
            return Err(MemSegError::invalid_config(
                "log_interval must be greater than zero",
            ));
        }
        if self.eval_interval == 0 {
            return Err(MemSegError::invalid_config(
                "eval_interval must be greater than zero",
            ));
        }
        if self.l1_weight < 0.0 || self.focal_weight < 0.0 {
            return Err(MemSegError::invalid_config(
                "loss weights must be non-negative",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TrainerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_step_budget_is_rejected() {
        let config = TrainerConfig {
            num_training_steps: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MemSegError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for (log_interval, eval_interval) in [(0, 10), (10, 0)] {
            let config = TrainerConfig {
                log_interval,
                eval_interval,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: TrainerConfig = serde_json::from_str(r#"{"num_training_steps": 50}"#).unwrap();
        assert_eq!(config.num_training_steps, 50);
        assert_eq!(config.eval_interval, 100);
        assert_eq!(config.l1_weight, 0.6);
    }
}
