//! Inference module for road anomaly prediction
//!
//! This module provides:
//! - Deterministic image preprocessing (`preprocess`)
//! - Single image, byte buffer, tensor and batch prediction (`predictor`)
//!
//! A [`Predictor`] only exposes `&self` methods once loaded. It is `Send` but not
//! `Sync`, so each request handler thread works on its own `clone()`.

pub mod predictor;
pub mod preprocess;

// Re-export main types for convenience
pub use predictor::{ClassPosterior, Prediction, Predictor};
pub use preprocess::{PreprocessConfig, IMAGENET_MEAN, IMAGENET_STD};

/// Image file extensions picked up when scanning a directory
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Whether a path looks like a supported image file
pub fn is_image_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
