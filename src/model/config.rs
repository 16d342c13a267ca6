//! Model Configuration Module
//!
//! Defines the structural configuration of the classification network.
//! Every field here changes the parameter set, so a configuration must match
//! the checkpoint it is loaded with.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classes::NUM_CLASSES;
use crate::utils::error::{Result, RoadAnomalyError};

/// Round a channel count to the nearest multiple of `divisor`, never dropping
/// more than 10% below the requested width.
pub fn make_divisible(value: f64, divisor: usize) -> usize {
    let rounded = (value + divisor as f64 / 2.0) as usize / divisor * divisor;
    let mut channels = rounded.max(divisor);
    if (channels as f64) < 0.9 * value {
        channels += divisor;
    }
    channels
}

/// One MBConv stage of the EfficientNet trunk, after width/depth scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub expand_ratio: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub num_layers: usize,
}

/// EfficientNet-B0 stage table: (expand_ratio, kernel, stride, in, out, layers)
const BASE_STAGES: [(usize, usize, usize, usize, usize, usize); 7] = [
    (1, 3, 1, 32, 16, 1),
    (6, 3, 2, 16, 24, 2),
    (6, 5, 2, 24, 40, 2),
    (6, 3, 2, 40, 80, 3),
    (6, 5, 1, 80, 112, 3),
    (6, 5, 2, 112, 192, 4),
    (6, 3, 1, 192, 320, 1),
];

/// Configuration for the EfficientNet feature extractor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackboneConfig {
    /// Channel width multiplier
    pub width_mult: f64,

    /// Stage depth multiplier
    pub depth_mult: f64,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self::b3()
    }
}

impl BackboneConfig {
    /// EfficientNet-B0 scaling
    pub fn b0() -> Self {
        Self {
            width_mult: 1.0,
            depth_mult: 1.0,
        }
    }

    /// EfficientNet-B3 scaling (1536 output channels)
    pub fn b3() -> Self {
        Self {
            width_mult: 1.2,
            depth_mult: 1.4,
        }
    }

    /// A very small trunk with the same topology, for tests and tooling
    pub fn tiny() -> Self {
        Self {
            width_mult: 0.25,
            depth_mult: 0.25,
        }
    }

    fn adjust_channels(&self, channels: usize) -> usize {
        make_divisible(channels as f64 * self.width_mult, 8)
    }

    fn adjust_depth(&self, layers: usize) -> usize {
        (layers as f64 * self.depth_mult).ceil() as usize
    }

    /// Output channels of the stem convolution
    pub fn stem_channels(&self) -> usize {
        self.adjust_channels(BASE_STAGES[0].3)
    }

    /// Scaled stage table
    pub fn stages(&self) -> Vec<StageSpec> {
        BASE_STAGES
            .iter()
            .map(|&(expand_ratio, kernel_size, stride, in_c, out_c, layers)| StageSpec {
                expand_ratio,
                kernel_size,
                stride,
                in_channels: self.adjust_channels(in_c),
                out_channels: self.adjust_channels(out_c),
                num_layers: self.adjust_depth(layers),
            })
            .collect()
    }

    /// Channels of the final feature map (4x the last stage width)
    pub fn feature_channels(&self) -> usize {
        4 * self.adjust_channels(BASE_STAGES[BASE_STAGES.len() - 1].4)
    }

    /// Spatial size of the final feature map for a square input
    pub fn feature_size(&self, input_size: usize) -> usize {
        // Stem plus every strided stage halves the resolution (3x3/5x5 with symmetric padding)
        let downsamples = 1 + BASE_STAGES.iter().filter(|s| s.2 == 2).count();
        (0..downsamples).fold(input_size, |size, _| (size + 1) / 2)
    }
}

/// Configuration for the full classification network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Whether the CBAM attention block sits between trunk and head
    pub use_cbam: bool,

    /// Channel-attention bottleneck reduction ratio
    pub reduction_ratio: usize,

    /// Spatial-attention convolution kernel size (odd)
    pub spatial_kernel_size: usize,

    /// Input image size (width and height)
    pub image_size: usize,

    /// Feature extractor scaling
    pub backbone: BackboneConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_classes: NUM_CLASSES,
            use_cbam: true,
            reduction_ratio: 16,
            spatial_kernel_size: 7,
            image_size: 224,
            backbone: BackboneConfig::b3(),
        }
    }
}

impl ModelConfig {
    /// A small network with the production topology, for tests and smoke runs
    pub fn tiny() -> Self {
        Self {
            backbone: BackboneConfig::tiny(),
            image_size: 64,
            ..Default::default()
        }
    }

    /// Toggle the attention block
    pub fn with_cbam(mut self, use_cbam: bool) -> Self {
        self.use_cbam = use_cbam;
        self
    }

    /// Override the number of classes
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Channels of the backbone feature map
    pub fn feature_channels(&self) -> usize {
        self.backbone.feature_channels()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(RoadAnomalyError::Config(
                "num_classes must be greater than 0".to_string(),
            ));
        }

        if self.reduction_ratio == 0 {
            return Err(RoadAnomalyError::Config(
                "reduction_ratio must be greater than 0".to_string(),
            ));
        }

        if self.spatial_kernel_size == 0 || self.spatial_kernel_size % 2 == 0 {
            return Err(RoadAnomalyError::Config(
                "spatial_kernel_size must be a positive odd number".to_string(),
            ));
        }

        if self.image_size < 32 {
            return Err(RoadAnomalyError::Config(
                "image_size must be at least 32".to_string(),
            ));
        }

        if self.backbone.width_mult <= 0.0 || self.backbone.depth_mult <= 0.0 {
            return Err(RoadAnomalyError::Config(
                "backbone multipliers must be positive".to_string(),
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

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
