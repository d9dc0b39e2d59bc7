use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DDoSError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Length of one aggregation window in seconds. Fixed for the life of a
    /// detector.
    pub window_secs: f64,
    /// Longest the monitor loop blocks on an empty queue before it looks at
    /// the stop flag again.
    pub poll_interval_ms: u64,
    /// `None` keeps the ingress queue unbounded. With a capacity the oldest
    /// queued packet is dropped to make room.
    pub queue_capacity: Option<usize>,
    pub history_cap: usize,
    /// Per-protocol packet count above which the rule flags a flood.
    pub threshold: u64,
    pub shutdown_timeout_ms: u64,
    pub model: Option<ModelConfig>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            window_secs: 1.0,
            poll_interval_ms: 100,
            queue_capacity: None,
            history_cap: 100,
            threshold: 100,
            shutdown_timeout_ms: 2000,
            model: None,
        }
    }
}

impl DetectorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: DetectorConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.window_secs.is_finite() || self.window_secs <= 0.0 {
            return Err(DDoSError::ConfigError(format!(
                "window_secs must be a positive number, got {}",
                self.window_secs
            )));
        }
        if Duration::try_from_secs_f64(self.window_secs).is_err() {
            return Err(DDoSError::ConfigError(format!(
                "window_secs {} is too large",
                self.window_secs
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".into());
        }
        if self.history_cap == 0 {
            return Err("history_cap must be greater than zero".into());
        }
        if self.queue_capacity == Some(0) {
            return Err("queue_capacity must be greater than zero when set".into());
        }
        if let Some(model) = &self.model {
            if model.timeout_ms == 0 {
                return Err("model.timeout_ms must be greater than zero".into());
            }
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    #[serde(default = "default_model_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_model_timeout_ms() -> u64 {
    250
}

impl ModelConfig {
    pub fn new(model_path: impl Into<PathBuf>, labels_path: impl Into<PathBuf>) -> Self {
        ModelConfig {
            model_path: model_path.into(),
            labels_path: labels_path.into(),
            timeout_ms: default_model_timeout_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
