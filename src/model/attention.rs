//! Convolutional Block Attention Module (CBAM)
//!
//! Re-weights a feature map twice: first per channel, then per pixel.
//! Both attention maps are sigmoid outputs in [0, 1] and broadcast over the
//! feature map, so the refined map always has the input's shape.
//!
//! Parameter names follow the PyTorch layout of the trained checkpoint:
//! - `channel_attention.fc.0.weight`: `[C/r, C, 1, 1]`
//! - `channel_attention.fc.2.weight`: `[C, C/r, 1, 1]`
//! - `spatial_attention.conv.weight`: `[1, 2, k, k]`

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    tensor::{
        activation::{relu, sigmoid},
        backend::Backend,
        Tensor,
    },
};

use crate::checkpoint::params::{join, ParamReader, ParamWriter};
use crate::utils::error::Result as CrateResult;

/// Configuration for the CBAM block
#[derive(Config, Debug)]
pub struct CbamConfig {
    /// Channels of the feature map being refined
    pub channels: usize,

    /// Bottleneck reduction ratio of the channel attention
    #[config(default = "16")]
    pub reduction_ratio: usize,

    /// Kernel size of the spatial attention convolution (odd)
    #[config(default = "7")]
    pub kernel_size: usize,
}

impl CbamConfig {
    /// Width of the channel-attention bottleneck (never zero)
    pub fn reduced_channels(&self) -> usize {
        (self.channels / self.reduction_ratio.max(1)).max(1)
    }

    /// Initialize a CBAM block on the given device
    pub fn init<B: Backend>(&self, device: &B::Device) -> Cbam<B> {
        let reduced = self.reduced_channels();

        let fc_reduce = Conv2dConfig::new([self.channels, reduced], [1, 1])
            .with_bias(false)
            .init(device);
        let fc_expand = Conv2dConfig::new([reduced, self.channels], [1, 1])
            .with_bias(false)
            .init(device);

        let padding = (self.kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([2, 1], [self.kernel_size, self.kernel_size])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device);

        Cbam {
            channel_attention: ChannelAttention {
                fc_reduce,
                fc_expand,
            },
            spatial_attention: SpatialAttention { conv },
        }
    }
}

/// Channel attention: one shared bottleneck applied to avg- and max-pooled descriptors
#[derive(Module, Debug)]
pub struct ChannelAttention<B: Backend> {
    pub fc_reduce: Conv2d<B>,
    pub fc_expand: Conv2d<B>,
}

impl<B: Backend> ChannelAttention<B> {
    fn bottleneck(&self, descriptor: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.fc_reduce.forward(descriptor);
        let x = relu(x);
        self.fc_expand.forward(x)
    }

    /// Attention weights of shape `[N, C, 1, 1]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let avg = x.clone().mean_dim(3).mean_dim(2);
        let max = x.max_dim(3).max_dim(2);

        // Same parameters on both paths
        sigmoid(self.bottleneck(avg) + self.bottleneck(max))
    }

    fn load_params(self, prefix: &str, reader: &mut ParamReader) -> Self {
        Self {
            fc_reduce: reader.conv2d(&join(prefix, "fc.0"), self.fc_reduce),
            fc_expand: reader.conv2d(&join(prefix, "fc.2"), self.fc_expand),
        }
    }

    fn export_params(&self, prefix: &str, writer: &mut ParamWriter) -> CrateResult<()> {
        writer.conv2d(&join(prefix, "fc.0"), &self.fc_reduce)?;
        writer.conv2d(&join(prefix, "fc.2"), &self.fc_expand)
    }
}

/// Spatial attention over channel-wise mean and max maps
#[derive(Module, Debug)]
pub struct SpatialAttention<B: Backend> {
    pub conv: Conv2d<B>,
}

impl<B: Backend> SpatialAttention<B> {
    /// Attention weights of shape `[N, 1, H, W]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let avg = x.clone().mean_dim(1);
        let max = x.max_dim(1);
        let stacked = Tensor::cat(vec![avg, max], 1);

        sigmoid(self.conv.forward(stacked))
    }

    fn load_params(self, prefix: &str, reader: &mut ParamReader) -> Self {
        Self {
            conv: reader.conv2d(&join(prefix, "conv"), self.conv),
        }
    }

    fn export_params(&self, prefix: &str, writer: &mut ParamWriter) -> CrateResult<()> {
        writer.conv2d(&join(prefix, "conv"), &self.conv)
    }
}

/// CBAM block: channel attention strictly before spatial attention
#[derive(Module, Debug)]
pub struct Cbam<B: Backend> {
    pub channel_attention: ChannelAttention<B>,
    pub spatial_attention: SpatialAttention<B>,
}

impl<B: Backend> Cbam<B> {
    /// Refine a feature map `[N, C, H, W]`; the output has the same shape
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = x.clone() * self.channel_attention.forward(x);
        x.clone() * self.spatial_attention.forward(x)
    }

    pub(crate) fn load_params(self, prefix: &str, reader: &mut ParamReader) -> Self {
        Self {
            channel_attention: self
                .channel_attention
                .load_params(&join(prefix, "channel_attention"), reader),
            spatial_attention: self
                .spatial_attention
                .load_params(&join(prefix, "spatial_attention"), reader),
        }
    }

    pub(crate) fn export_params(&self, prefix: &str, writer: &mut ParamWriter) -> CrateResult<()> {
        self.channel_attention
            .export_params(&join(prefix, "channel_attention"), writer)?;
        self.spatial_attention
            .export_params(&join(prefix, "spatial_attention"), writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_reduced_channels_never_zero() {
        assert_eq!(CbamConfig::new(1536).reduced_channels(), 96);
        assert_eq!(CbamConfig::new(40).reduced_channels(), 2);
        assert_eq!(CbamConfig::new(8).reduced_channels(), 1);
    }

    #[test]
    fn test_cbam_preserves_shape() {
        let device = Default::default();
        let cbam = CbamConfig::new(32).init::<TestBackend>(&device);

        for (h, w) in [(7, 7), (5, 9), (1, 1)] {
            let x = Tensor::<TestBackend, 4>::random([2, 32, h, w], Distribution::Default, &device);
            assert_eq!(cbam.forward(x).dims(), [2, 32, h, w]);
        }
    }

    #[test]
    fn test_attention_weight_shapes_and_range() {
        let device = Default::default();
        let cbam = CbamConfig::new(16)
            .with_reduction_ratio(4)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random(
            [1, 16, 6, 6],
            Distribution::Uniform(-3.0, 3.0),
            &device,
        );

        let channel = cbam.channel_attention.forward(x.clone());
        assert_eq!(channel.dims(), [1, 16, 1, 1]);

        let spatial = cbam.spatial_attention.forward(x);
        assert_eq!(spatial.dims(), [1, 1, 6, 6]);

        for weights in [channel.into_data(), spatial.into_data()] {
            let values: Vec<f32> = weights.to_vec().unwrap();
            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_spatial_padding_keeps_size() {
        let device = Default::default();
        let cbam = CbamConfig::new(4)
            .with_kernel_size(3)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::ones([1, 4, 10, 3], &device);
        assert_eq!(cbam.spatial_attention.forward(x).dims(), [1, 1, 10, 3]);
    }

    #[test]
    fn test_single_bottleneck_parameter_set() {
        let device = Default::default();
        let cbam = CbamConfig::new(64).init::<TestBackend>(&device);

        let mut writer = ParamWriter::new();
        cbam.export_params("cbam", &mut writer).unwrap();
        let store = writer.into_store();

        let names: Vec<&str> = store.names().collect();
        assert_eq!(
            names,
            vec![
                "cbam.channel_attention.fc.0.weight",
                "cbam.channel_attention.fc.2.weight",
                "cbam.spatial_attention.conv.weight",
            ]
        );
        assert_eq!(
            store.get("cbam.channel_attention.fc.0.weight").unwrap().shape,
            vec![4, 64, 1, 1]
        );
        assert_eq!(
            store.get("cbam.spatial_attention.conv.weight").unwrap().shape,
            vec![1, 2, 7, 7]
        );
    }
}
