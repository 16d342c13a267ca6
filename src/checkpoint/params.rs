//! Named parameter store
//!
//! A flat `name -> tensor` mapping using the PyTorch `state_dict` naming scheme,
//! plus a strict reader that moves tensors into Burn modules and a writer that
//! dumps them back out.
//!
//! The reader never fails half-way: every missing, misshapen or mistyped entry is
//! recorded, and [`ParamReader::finish`] reports them all together with any
//! entries the network did not ask for.

use std::collections::BTreeMap;
use std::fmt::Display;

use burn::{
    module::{Param, RunningState},
    nn::{conv::Conv2d, BatchNorm, Linear},
    tensor::{backend::Backend, Tensor, TensorData},
};
use safetensors::Dtype;

use crate::utils::error::{Result, RoadAnomalyError};

/// Maximum number of individual issues listed in an incompatibility report
const MAX_REPORTED_ISSUES: usize = 8;

/// Join a parameter path segment onto a prefix
pub fn join(prefix: &str, name: impl Display) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// One stored tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorEntry {
    /// Element type as stored in the file
    pub dtype: Dtype,

    /// Dimensions, outermost first
    pub shape: Vec<usize>,

    /// Row-major values; empty unless `dtype` is F32
    pub values: Vec<f32>,
}

impl TensorEntry {
    /// An F32 tensor
    pub fn f32(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            dtype: Dtype::F32,
            shape,
            values,
        }
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Ordered `name -> tensor` mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamStore {
    tensors: BTreeMap<String, TensorEntry>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: TensorEntry) {
        self.tensors.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&TensorEntry> {
        self.tensors.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TensorEntry> {
        self.tensors.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TensorEntry)> {
        self.tensors.iter()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar values across all tensors
    pub fn num_parameters(&self) -> usize {
        self.tensors.values().map(TensorEntry::numel).sum()
    }

    /// Prepend `prefix.` to every name
    pub fn with_prefix(self, prefix: &str) -> Self {
        Self {
            tensors: self
                .tensors
                .into_iter()
                .map(|(name, entry)| (join(prefix, name), entry))
                .collect(),
        }
    }

    /// Keep only entries under `prefix` (which must include its trailing dot),
    /// with the prefix removed. Returns the store and the number of dropped entries.
    pub fn split_prefix(self, prefix: &str) -> (Self, usize) {
        let total = self.tensors.len();
        let tensors: BTreeMap<String, TensorEntry> = self
            .tensors
            .into_iter()
            .filter_map(|(name, entry)| {
                name.strip_prefix(prefix)
                    .map(|stripped| (stripped.to_string(), entry))
            })
            .collect();
        let dropped = total - tensors.len();
        (Self { tensors }, dropped)
    }
}

/// Moves stored tensors into modules, checking names, shapes and dtypes
pub struct ParamReader {
    remaining: BTreeMap<String, TensorEntry>,
    issues: Vec<String>,
}

impl ParamReader {
    pub fn new(store: ParamStore) -> Self {
        Self {
            remaining: store.tensors,
            issues: Vec::new(),
        }
    }

    fn take(&mut self, name: &str, expected: &[usize]) -> Option<Vec<f32>> {
        match self.remaining.remove(name) {
            None => {
                self.issues
                    .push(format!("missing '{}' (expected shape {:?})", name, expected));
                None
            }
            Some(entry) if entry.dtype != Dtype::F32 => {
                self.issues
                    .push(format!("'{}' has dtype {:?}, expected F32", name, entry.dtype));
                None
            }
            Some(entry) if entry.shape != expected => {
                self.issues.push(format!(
                    "'{}' has shape {:?}, expected {:?}",
                    name, entry.shape, expected
                ));
                None
            }
            Some(entry) => Some(entry.values),
        }
    }

    /// Drop an optional entry without validating it
    fn skip(&mut self, name: &str) {
        self.remaining.remove(name);
    }

    /// Replace `current` with the stored tensor of the same shape
    pub fn tensor<B: Backend, const D: usize>(
        &mut self,
        name: &str,
        current: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let shape = current.dims();
        match self.take(name, &shape) {
            Some(values) => {
                Tensor::from_data(TensorData::new(values, shape.to_vec()), &current.device())
            }
            None => current,
        }
    }

    pub fn param<B: Backend, const D: usize>(
        &mut self,
        name: &str,
        param: Param<Tensor<B, D>>,
    ) -> Param<Tensor<B, D>> {
        Param::from_tensor(self.tensor(name, param.val()))
    }

    pub fn conv2d<B: Backend>(&mut self, prefix: &str, mut conv: Conv2d<B>) -> Conv2d<B> {
        conv.weight = self.param(&join(prefix, "weight"), conv.weight);
        conv.bias = conv
            .bias
            .take()
            .map(|bias| self.param(&join(prefix, "bias"), bias));
        conv
    }

    /// Batch norm affine parameters and running statistics.
    ///
    /// `num_batches_tracked` is a training counter and is accepted but ignored.
    pub fn batch_norm<B: Backend>(&mut self, prefix: &str, mut bn: BatchNorm<B>) -> BatchNorm<B> {
        bn.gamma = self.param(&join(prefix, "weight"), bn.gamma);
        bn.beta = self.param(&join(prefix, "bias"), bn.beta);
        bn.running_mean = RunningState::new(
            self.tensor(&join(prefix, "running_mean"), bn.running_mean.value()),
        );
        bn.running_var = RunningState::new(
            self.tensor(&join(prefix, "running_var"), bn.running_var.value()),
        );
        self.skip(&join(prefix, "num_batches_tracked"));
        bn
    }

    /// Linear layers are stored `[out, in]` and held by Burn as `[in, out]`
    pub fn linear<B: Backend>(&mut self, prefix: &str, mut linear: Linear<B>) -> Linear<B> {
        let weight = linear.weight.val();
        let [d_input, d_output] = weight.dims();

        if let Some(values) = self.take(&join(prefix, "weight"), &[d_output, d_input]) {
            let stored = Tensor::<B, 2>::from_data(
                TensorData::new(values, [d_output, d_input]),
                &weight.device(),
            );
            linear.weight = Param::from_tensor(stored.transpose());
        }
        linear.bias = linear
            .bias
            .take()
            .map(|bias| self.param(&join(prefix, "bias"), bias));
        linear
    }

    /// Succeeds only if every expected entry was present and valid and
    /// nothing unexpected was left over.
    pub fn finish(self) -> std::result::Result<(), String> {
        let mut issues = self.issues;
        issues.extend(
            self.remaining
                .keys()
                .map(|name| format!("unexpected '{}'", name)),
        );

        if issues.is_empty() {
            return Ok(());
        }

        let total = issues.len();
        let mut report = issues
            .into_iter()
            .take(MAX_REPORTED_ISSUES)
            .collect::<Vec<_>>()
            .join("; ");
        if total > MAX_REPORTED_ISSUES {
            report.push_str(&format!("; ... and {} more", total - MAX_REPORTED_ISSUES));
        }
        Err(report)
    }
}

/// Dumps module parameters into a [`ParamStore`]
#[derive(Default)]
pub struct ParamWriter {
    store: ParamStore,
}

impl ParamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_store(self) -> ParamStore {
        self.store
    }

    pub fn tensor<B: Backend, const D: usize>(&mut self, name: &str, tensor: Tensor<B, D>) -> Result<()> {
        let shape = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| {
                RoadAnomalyError::Serialization(format!("Failed to read '{}': {:?}", name, e))
            })?;
        self.store.insert(name, TensorEntry::f32(shape, values));
        Ok(())
    }

    pub fn conv2d<B: Backend>(&mut self, prefix: &str, conv: &Conv2d<B>) -> Result<()> {
        self.tensor(&join(prefix, "weight"), conv.weight.val())?;
        if let Some(bias) = &conv.bias {
            self.tensor(&join(prefix, "bias"), bias.val())?;
        }
        Ok(())
    }

    pub fn batch_norm<B: Backend>(&mut self, prefix: &str, bn: &BatchNorm<B>) -> Result<()> {
        self.tensor(&join(prefix, "weight"), bn.gamma.val())?;
        self.tensor(&join(prefix, "bias"), bn.beta.val())?;
        self.tensor(&join(prefix, "running_mean"), bn.running_mean.value())?;
        self.tensor(&join(prefix, "running_var"), bn.running_var.value())
    }

    pub fn linear<B: Backend>(&mut self, prefix: &str, linear: &Linear<B>) -> Result<()> {
        self.tensor(&join(prefix, "weight"), linear.weight.val().transpose())?;
        if let Some(bias) = &linear.bias {
            self.tensor(&join(prefix, "bias"), bias.val())?;
        }
        Ok(())
    }
}
