//! Road Anomaly Network
//!
//! EfficientNet features, optional CBAM refinement, global average pooling and the
//! classifier head. Parameter names mirror the trained PyTorch model:
//! `backbone.features.*`, `cbam.*` and `backbone.classifier.*`.

use burn::{
    module::Module,
    nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use crate::checkpoint::params::{ParamReader, ParamStore, ParamWriter};
use crate::model::attention::{Cbam, CbamConfig};
use crate::model::backbone::Backbone;
use crate::model::config::ModelConfig;
use crate::model::head::{ClassifierHead, ClassifierHeadConfig};
use crate::utils::error::Result;

pub const FEATURES_PREFIX: &str = "backbone.features";
pub const CBAM_PREFIX: &str = "cbam";
pub const CLASSIFIER_PREFIX: &str = "backbone.classifier";

/// Attention-augmented road anomaly classifier
#[derive(Module, Debug)]
pub struct RoadAnomalyNet<B: Backend> {
    pub backbone: Backbone<B>,
    pub cbam: Option<Cbam<B>>,
    pub pool: AdaptiveAvgPool2d,
    pub classifier: ClassifierHead<B>,
}

impl<B: Backend> RoadAnomalyNet<B> {
    /// Build the network with freshly initialized parameters
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        let backbone = Backbone::new(&config.backbone, device);
        let channels = backbone.out_channels();

        let cbam = config.use_cbam.then(|| {
            CbamConfig::new(channels)
                .with_reduction_ratio(config.reduction_ratio)
                .with_kernel_size(config.spatial_kernel_size)
                .init(device)
        });

        let classifier = ClassifierHeadConfig::new(channels, config.num_classes).init(device);

        Self {
            backbone,
            cbam,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier,
        }
    }

    /// Feature map after the trunk and, when enabled, attention refinement
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.backbone.forward(x);
        match &self.cbam {
            Some(cbam) => cbam.forward(x),
            None => x,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Normalized images of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(x);

        // Global pooling: [B, C, H, W] -> [B, C, 1, 1]
        let x = self.pool.forward(x);

        // Flatten: [B, C, 1, 1] -> [B, C]
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.classifier.forward(x)
    }

    /// Forward pass with softmax over the class axis
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    /// Whether the attention block is part of the network
    pub fn uses_cbam(&self) -> bool {
        self.cbam.is_some()
    }

    /// Replace every parameter with its stored counterpart.
    ///
    /// Problems are collected in `reader`; call [`ParamReader::finish`] afterwards.
    pub fn load_params(self, reader: &mut ParamReader) -> Self {
        Self {
            backbone: self.backbone.load_params(FEATURES_PREFIX, reader),
            cbam: self.cbam.map(|cbam| cbam.load_params(CBAM_PREFIX, reader)),
            pool: self.pool,
            classifier: self.classifier.load_params(CLASSIFIER_PREFIX, reader),
        }
    }

    /// Dump every parameter under its checkpoint name
    pub fn export_params(&self) -> Result<ParamStore> {
        let mut writer = ParamWriter::new();
        self.backbone.export_params(FEATURES_PREFIX, &mut writer)?;
        if let Some(cbam) = &self.cbam {
            cbam.export_params(CBAM_PREFIX, &mut writer)?;
        }
        self.classifier
            .export_params(CLASSIFIER_PREFIX, &mut writer)?;
        Ok(writer.into_store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_network_output_shape() {
        let device = Default::default();
        let config = ModelConfig::tiny();
        let model = RoadAnomalyNet::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 5]);
        assert_eq!(model.num_classes(), 5);
        assert!(model.uses_cbam());
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = RoadAnomalyNet::<TestBackend>::new(&ModelConfig::tiny(), &device);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 64, 64], &device);
        let probs: Vec<f32> = model.forward_softmax(input).into_data().to_vec().unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cbam_flag_changes_parameter_set() {
        let device = Default::default();
        let with = RoadAnomalyNet::<TestBackend>::new(&ModelConfig::tiny(), &device)
            .export_params()
            .unwrap();
        let without =
            RoadAnomalyNet::<TestBackend>::new(&ModelConfig::tiny().with_cbam(false), &device)
                .export_params()
                .unwrap();

        assert_eq!(with.len(), without.len() + 3);
        assert!(with.names().any(|n| n.starts_with("cbam.")));
        assert!(!without.names().any(|n| n.starts_with("cbam.")));
    }

    #[test]
    fn test_b3_feature_map_feeds_1536_wide_attention() {
        let device = Default::default();
        let model = RoadAnomalyNet::<TestBackend>::new(&ModelConfig::default(), &device);
        let store = model.export_params().unwrap();

        assert_eq!(
            store.get("cbam.channel_attention.fc.0.weight").unwrap().shape,
            vec![96, 1536, 1, 1]
        );
        assert_eq!(
            store.get("backbone.classifier.1.weight").unwrap().shape,
            vec![1024, 1536]
        );
    }
}
