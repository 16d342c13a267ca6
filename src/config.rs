//! Inference service configuration
//!
//! Everything needed to bring a predictor up: where the weights live, which device
//! to run on, the network topology and the log level. Stored as JSON; CLI flags
//! override individual fields.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::ModelConfig;
use crate::utils::error::{Result, RoadAnomalyError};
use crate::utils::logging::LogLevel;

/// Default checkpoint location
pub const DEFAULT_CHECKPOINT: &str = "model/best_road_anomaly_model_5class.safetensors";

/// Compute device for inference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Accelerator,
}

impl FromStr for DeviceKind {
    type Err = RoadAnomalyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "accelerator" | "gpu" | "cuda" => Ok(DeviceKind::Accelerator),
            other => Err(RoadAnomalyError::Config(format!(
                "unknown device '{}' (expected cpu or accelerator)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Configuration for bringing up a predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Safetensors checkpoint to load
    pub checkpoint_path: PathBuf,

    /// Device to bind the model to
    pub device: DeviceKind,

    /// Network topology
    pub model: ModelConfig,

    /// Log level name (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT),
            device: DeviceKind::Cpu,
            model: ModelConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl InferenceConfig {
    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_str(&self.log_level)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if self.checkpoint_path.as_os_str().is_empty() {
            return Err(RoadAnomalyError::Config(
                "checkpoint_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
