//! EfficientNet Feature Extractor
//!
//! The convolutional trunk of the classifier, laid out like torchvision's
//! `efficientnet_*().features` so that its `state_dict` names line up:
//!
//! - `features.0`: stem, 3x3 stride-2 conv + BN + SiLU
//! - `features.1` .. `features.7`: MBConv stages
//! - `features.8`: 1x1 conv + BN + SiLU to the final feature width
//!
//! For EfficientNet-B3 a 224x224 input yields a `[N, 1536, 7, 7]` feature map.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{sigmoid, silu},
        backend::Backend,
        Tensor,
    },
};

use crate::checkpoint::params::{join, ParamReader, ParamWriter};
use crate::model::config::{make_divisible, BackboneConfig, StageSpec};
use crate::utils::error::Result;

/// Conv2d (no bias) followed by BatchNorm and an optional SiLU
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub activate: bool,
}

impl<B: Backend> ConvNormAct<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activate: bool,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn, activate }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        if self.activate {
            silu(x)
        } else {
            x
        }
    }

    fn load_params(self, prefix: &str, reader: &mut ParamReader) -> Self {
        Self {
            conv: reader.conv2d(&join(prefix, 0), self.conv),
            bn: reader.batch_norm(&join(prefix, 1), self.bn),
            activate: self.activate,
        }
    }

    fn export_params(&self, prefix: &str, writer: &mut ParamWriter) -> Result<()> {
        writer.conv2d(&join(prefix, 0), &self.conv)?;
        writer.batch_norm(&join(prefix, 1), &self.bn)
    }
}

/// Squeeze-and-excitation: global context gates each channel
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pub fc1: Conv2d<B>,
    pub fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn new(channels: usize, squeeze_channels: usize, device: &B::Device) -> Self {
        Self {
            fc1: Conv2dConfig::new([channels, squeeze_channels], [1, 1]).init(device),
            fc2: Conv2dConfig::new([squeeze_channels, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = x.clone().mean_dim(3).mean_dim(2);
        let scale = silu(self.fc1.forward(scale));
        let scale = sigmoid(self.fc2.forward(scale));
        x * scale
    }

    fn load_params(self, prefix: &str, reader: &mut ParamReader) -> Self {
        Self {
            fc1: reader.conv2d(&join(prefix, "fc1"), self.fc1),
            fc2: reader.conv2d(&join(prefix, "fc2"), self.fc2),
        }
    }

    fn export_params(&self, prefix: &str, writer: &mut ParamWriter) -> Result<()> {
        writer.conv2d(&join(prefix, "fc1"), &self.fc1)?;
        writer.conv2d(&join(prefix, "fc2"), &self.fc2)
    }
}

/// Mobile inverted bottleneck block
///
/// expand (1x1, skipped when the ratio is 1) -> depthwise kxk -> SE -> project (1x1, linear),
/// with a residual connection when stride is 1 and the width is unchanged.
/// Stochastic depth only acts during training and is omitted.
#[derive(Module, Debug)]
pub struct MBConv<B: Backend> {
    pub expand: Option<ConvNormAct<B>>,
    pub depthwise: ConvNormAct<B>,
    pub se: SqueezeExcitation<B>,
    pub project: ConvNormAct<B>,
    pub use_residual: bool,
}

impl<B: Backend> MBConv<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel_size: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let expanded = make_divisible((in_channels * expand_ratio) as f64, 8);

        let expand = (expanded != in_channels)
            .then(|| ConvNormAct::new(in_channels, expanded, 1, 1, 1, true, device));
        let depthwise =
            ConvNormAct::new(expanded, expanded, kernel_size, stride, expanded, true, device);
        let se = SqueezeExcitation::new(expanded, (in_channels / 4).max(1), device);
        let project = ConvNormAct::new(expanded, out_channels, 1, 1, 1, false, device);

        Self {
            expand,
            depthwise,
            se,
            project,
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x);
        let x = self.se.forward(x);
        let x = self.project.forward(x);

        if self.use_residual {
            x + input
        } else {
            x
        }
    }

    /// Sub-layers are numbered in `block` order, shifted by one when there is no expansion
    fn layer_names(&self, prefix: &str) -> [String; 4] {
        let block = join(prefix, "block");
        let offset = usize::from(self.expand.is_some());
        [
            join(&block, 0),
            join(&block, offset),
            join(&block, offset + 1),
            join(&block, offset + 2),
        ]
    }

    fn load_params(self, prefix: &str, reader: &mut ParamReader) -> Self {
        let [expand_name, depthwise_name, se_name, project_name] = self.layer_names(prefix);
        Self {
            expand: self
                .expand
                .map(|expand| expand.load_params(&expand_name, reader)),
            depthwise: self.depthwise.load_params(&depthwise_name, reader),
            se: self.se.load_params(&se_name, reader),
            project: self.project.load_params(&project_name, reader),
            use_residual: self.use_residual,
        }
    }

    fn export_params(&self, prefix: &str, writer: &mut ParamWriter) -> Result<()> {
        let [expand_name, depthwise_name, se_name, project_name] = self.layer_names(prefix);
        if let Some(expand) = &self.expand {
            expand.export_params(&expand_name, writer)?;
        }
        self.depthwise.export_params(&depthwise_name, writer)?;
        self.se.export_params(&se_name, writer)?;
        self.project.export_params(&project_name, writer)
    }
}

/// A sequence of MBConv blocks; only the first may change stride or width
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    pub blocks: Vec<MBConv<B>>,
}

impl<B: Backend> Stage<B> {
    pub fn new(spec: &StageSpec, device: &B::Device) -> Self {
        let blocks = (0..spec.num_layers)
            .map(|i| {
                let (in_channels, stride) = if i == 0 {
                    (spec.in_channels, spec.stride)
                } else {
                    (spec.out_channels, 1)
                };
                MBConv::new(
                    in_channels,
                    spec.out_channels,
                    spec.expand_ratio,
                    spec.kernel_size,
                    stride,
                    device,
                )
            })
            .collect();

        Self { blocks }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// EfficientNet trunk (features only, no pooling or classifier)
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub stem: ConvNormAct<B>,
    pub stages: Vec<Stage<B>>,
    pub head: ConvNormAct<B>,
    pub out_channels: usize,
}

impl<B: Backend> Backbone<B> {
    pub fn new(config: &BackboneConfig, device: &B::Device) -> Self {
        let specs = config.stages();
        let stem = ConvNormAct::new(3, config.stem_channels(), 3, 2, 1, true, device);
        let stages = specs.iter().map(|spec| Stage::new(spec, device)).collect();

        let last_stage_channels = specs
            .last()
            .map(|spec| spec.out_channels)
            .unwrap_or_else(|| config.stem_channels());
        let out_channels = config.feature_channels();
        let head = ConvNormAct::new(last_stage_channels, out_channels, 1, 1, 1, true, device);

        Self {
            stem,
            stages,
            head,
            out_channels,
        }
    }

    /// Feature map `[N, C, H/32, W/32]` for an input `[N, 3, H, W]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem.forward(x);
        let x = self.stages.iter().fold(x, |x, stage| stage.forward(x));
        self.head.forward(x)
    }

    /// Number of channels in the produced feature map
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub(crate) fn load_params(self, prefix: &str, reader: &mut ParamReader) -> Self {
        let head_index = self.stages.len() + 1;
        let stem = self.stem.load_params(&join(prefix, 0), reader);

        let stages = self
            .stages
            .into_iter()
            .enumerate()
            .map(|(s, stage)| {
                let stage_prefix = join(prefix, s + 1);
                Stage {
                    blocks: stage
                        .blocks
                        .into_iter()
                        .enumerate()
                        .map(|(b, block)| block.load_params(&join(&stage_prefix, b), reader))
                        .collect(),
                }
            })
            .collect();

        let head = self.head.load_params(&join(prefix, head_index), reader);

        Self {
            stem,
            stages,
            head,
            out_channels: self.out_channels,
        }
    }

    pub(crate) fn export_params(&self, prefix: &str, writer: &mut ParamWriter) -> Result<()> {
        self.stem.export_params(&join(prefix, 0), writer)?;
        for (s, stage) in self.stages.iter().enumerate() {
            let stage_prefix = join(prefix, s + 1);
            for (b, block) in stage.blocks.iter().enumerate() {
                block.export_params(&join(&stage_prefix, b), writer)?;
            }
        }
        self.head
            .export_params(&join(prefix, self.stages.len() + 1), writer)
    }
}
