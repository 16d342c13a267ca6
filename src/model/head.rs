//! Classifier Head
//!
//! Fully connected stack mapping pooled features to class logits:
//!
//! ```text
//! Dropout(0.3) -> Linear(in, 1024) -> BatchNorm(1024) -> ReLU
//!   -> Dropout(0.4) -> Linear(1024, 512) -> BatchNorm(512) -> ReLU
//!   -> Dropout(0.3) -> Linear(512, num_classes)
//! ```
//!
//! Positions in this sequence are the checkpoint indices (`classifier.1`, `classifier.2`,
//! `classifier.5`, `classifier.6`, `classifier.9`). On an inference backend Burn's
//! dropout is the identity and batch norm normalizes with its running statistics.

use burn::{
    config::Config,
    module::Module,
    nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{activation::relu, backend::Backend, Tensor},
};

use crate::checkpoint::params::{join, ParamReader, ParamWriter};
use crate::utils::error::Result as CrateResult;

/// Configuration for the classifier head
#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    /// Width of the pooled feature vector
    pub in_features: usize,

    /// Number of output classes
    pub num_classes: usize,

    #[config(default = "1024")]
    pub hidden_1: usize,

    #[config(default = "512")]
    pub hidden_2: usize,

    #[config(default = "0.3")]
    pub dropout_in: f64,

    #[config(default = "0.4")]
    pub dropout_mid: f64,

    #[config(default = "0.3")]
    pub dropout_out: f64,
}

impl ClassifierHeadConfig {
    /// Initialize the head on the given device
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            dropout_in: DropoutConfig::new(self.dropout_in).init(),
            fc1: LinearConfig::new(self.in_features, self.hidden_1).init(device),
            bn1: BatchNormConfig::new(self.hidden_1).init(device),
            dropout_mid: DropoutConfig::new(self.dropout_mid).init(),
            fc2: LinearConfig::new(self.hidden_1, self.hidden_2).init(device),
            bn2: BatchNormConfig::new(self.hidden_2).init(device),
            dropout_out: DropoutConfig::new(self.dropout_out).init(),
            fc3: LinearConfig::new(self.hidden_2, self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub dropout_in: Dropout,
    pub fc1: Linear<B>,
    pub bn1: BatchNorm<B>,
    pub dropout_mid: Dropout,
    pub fc2: Linear<B>,
    pub bn2: BatchNorm<B>,
    pub dropout_out: Dropout,
    pub fc3: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// Logits `[N, num_classes]` for pooled features `[N, in_features]`
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.dropout_in.forward(x);
        let x = self.fc1.forward(x);
        let x = self.bn1.forward(x);
        let x = relu(x);

        let x = self.dropout_mid.forward(x);
        let x = self.fc2.forward(x);
        let x = self.bn2.forward(x);
        let x = relu(x);

        let x = self.dropout_out.forward(x);
        self.fc3.forward(x)
    }

    /// Output width of the final layer
    pub fn num_classes(&self) -> usize {
        self.fc3.weight.dims()[1]
    }

    pub(crate) fn load_params(self, prefix: &str, reader: &mut ParamReader) -> Self {
        Self {
            fc1: reader.linear(&join(prefix, 1), self.fc1),
            bn1: reader.batch_norm(&join(prefix, 2), self.bn1),
            fc2: reader.linear(&join(prefix, 5), self.fc2),
            bn2: reader.batch_norm(&join(prefix, 6), self.bn2),
            fc3: reader.linear(&join(prefix, 9), self.fc3),
            ..self
        }
    }

    pub(crate) fn export_params(&self, prefix: &str, writer: &mut ParamWriter) -> CrateResult<()> {
        writer.linear(&join(prefix, 1), &self.fc1)?;
        writer.batch_norm(&join(prefix, 2), &self.bn1)?;
        writer.linear(&join(prefix, 5), &self.fc2)?;
        writer.batch_norm(&join(prefix, 6), &self.bn2)?;
        writer.linear(&join(prefix, 9), &self.fc3)
    }
}
