//! # Road Anomaly Classification
//!
//! A Rust library for classifying road-surface photographs into five defect
//! categories using the Burn framework.
//!
//! ## Features
//!
//! - **EfficientNet-B3 trunk** with an optional **CBAM** (channel + spatial attention) block
//! - **PyTorch-compatible checkpoints** in safetensors format, bare or wrapped in
//!   `model_state_dict`
//! - **Deterministic inference**: preprocessing, softmax posterior, label and confidence
//!
//! ## Modules
//!
//! - `model`: network architecture built with Burn
//! - `checkpoint`: loading, validating and dumping weight files
//! - `inference`: preprocessing and prediction
//! - `config`: service configuration
//! - `utils`: logging, errors and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use road_anomaly::backend::{cpu_device, CpuBackend};
//! use road_anomaly::{ModelConfig, Predictor};
//!
//! let predictor = Predictor::<CpuBackend>::load(
//!     "model/best_road_anomaly_model_5class.safetensors".as_ref(),
//!     &ModelConfig::default(),
//!     cpu_device(),
//! )?;
//! let prediction = predictor.predict_file("road.jpg".as_ref())?;
//! println!("{} ({:.3})", prediction.predicted_label, prediction.confidence);
//! ```

pub mod backend;
pub mod checkpoint;
pub mod classes;
pub mod config;
pub mod inference;
pub mod model;
pub mod utils;

// Re-export commonly used items for convenience
pub use classes::{RoadClass, CLASS_NAMES, NUM_CLASSES};
pub use config::{DeviceKind, InferenceConfig};
pub use inference::{Prediction, Predictor, PreprocessConfig};
pub use model::{ModelConfig, RoadAnomalyNet};
pub use utils::error::{Result, RoadAnomalyError};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
