//! Checkpoint loading and saving
//!
//! Checkpoints are safetensors files whose tensor names follow the PyTorch
//! `state_dict` of the trained model. Two layouts are accepted:
//!
//! - **Bare**: tensor names are parameter names (`backbone.features.0.0.weight`, ...).
//! - **Wrapped**: parameter tensors live under `model_state_dict.`; everything else
//!   (optimizer state, counters) is ignored.
//!
//! Files written by [`save`] carry a schema tag in the safetensors header
//! (`format`, `format_version`, `num_classes`, `use_cbam`). Tagged files are checked
//! against the configured network before any tensor is read. Untagged files are
//! still accepted through the bare/wrapped detection above.

pub mod params;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use tracing::{debug, info, warn};

use crate::model::{ModelConfig, RoadAnomalyNet};
use crate::utils::error::{Result, RoadAnomalyError};

pub use params::{ParamReader, ParamStore, ParamWriter, TensorEntry};

/// Header value identifying checkpoints written by this crate
pub const FORMAT_NAME: &str = "road-anomaly-checkpoint";

/// Current schema version
pub const FORMAT_VERSION: &str = "1";

/// Prefix of the parameter mapping in wrapped checkpoints
pub const WRAPPED_PREFIX: &str = "model_state_dict.";

/// How parameters are laid out in a checkpoint file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    /// Parameter names at the top level
    Bare,
    /// Parameters under `model_state_dict.`, alongside ignored training state
    Wrapped,
}

impl std::fmt::Display for CheckpointLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointLayout::Bare => write!(f, "bare"),
            CheckpointLayout::Wrapped => write!(f, "wrapped (model_state_dict)"),
        }
    }
}

/// A decoded checkpoint file
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    pub path: PathBuf,
    pub layout: CheckpointLayout,
    /// Safetensors header metadata
    pub metadata: HashMap<String, String>,
    /// Parameter tensors, already unwrapped
    pub params: ParamStore,
    /// Entries dropped while unwrapping
    pub ignored_entries: usize,
}

impl CheckpointFile {
    /// Whether the file carries this crate's schema tag
    pub fn is_tagged(&self) -> bool {
        self.metadata.contains_key("format")
    }
}

/// Read and unwrap a checkpoint without building a network
pub fn read_checkpoint(path: &Path) -> Result<CheckpointFile> {
    if !path.exists() {
        return Err(RoadAnomalyError::CheckpointNotFound(path.to_path_buf()));
    }

    let bytes = fs::read(path)?;
    let not_safetensors =
        |e: safetensors::SafeTensorError| RoadAnomalyError::incompatible(path, format!("not a safetensors file: {}", e));

    let (_, header) = SafeTensors::read_metadata(&bytes).map_err(not_safetensors)?;
    let metadata = header.metadata().clone().unwrap_or_default();
    let tensors = SafeTensors::deserialize(&bytes).map_err(not_safetensors)?;

    let mut store = ParamStore::new();
    for (name, view) in tensors.tensors() {
        let values = if view.dtype() == Dtype::F32 {
            bytemuck::pod_collect_to_vec::<u8, f32>(view.data())
        } else {
            Vec::new()
        };
        store.insert(
            name,
            TensorEntry {
                dtype: view.dtype(),
                shape: view.shape().to_vec(),
                values,
            },
        );
    }

    let wrapped = store.names().any(|name| name.starts_with(WRAPPED_PREFIX));
    let (params, layout, ignored_entries) = if wrapped {
        let (params, dropped) = store.split_prefix(WRAPPED_PREFIX);
        (params, CheckpointLayout::Wrapped, dropped)
    } else {
        (store, CheckpointLayout::Bare, 0)
    };

    debug!(
        "Read checkpoint {:?}: {} layout, {} tensors, {} ignored",
        path,
        layout,
        params.len(),
        ignored_entries
    );

    Ok(CheckpointFile {
        path: path.to_path_buf(),
        layout,
        metadata,
        params,
        ignored_entries,
    })
}

/// Check the schema tag, if any, against the configured network
fn validate_tag(file: &CheckpointFile, config: &ModelConfig) -> Result<()> {
    let Some(format) = file.metadata.get("format") else {
        warn!(
            "Checkpoint {:?} has no schema tag; matching {} layout by tensor names only",
            file.path, file.layout
        );
        return Ok(());
    };

    let incompatible = |reason: String| RoadAnomalyError::incompatible(&file.path, reason);

    if format != FORMAT_NAME {
        return Err(incompatible(format!("unknown checkpoint format '{}'", format)));
    }

    match file.metadata.get("format_version").map(String::as_str) {
        Some(FORMAT_VERSION) => {}
        other => {
            return Err(incompatible(format!(
                "unsupported format version {:?} (expected {})",
                other, FORMAT_VERSION
            )))
        }
    }

    if let Some(use_cbam) = file.metadata.get("use_cbam") {
        let tagged: bool = use_cbam
            .parse()
            .map_err(|_| incompatible(format!("invalid use_cbam tag '{}'", use_cbam)))?;
        if tagged != config.use_cbam {
            return Err(incompatible(format!(
                "checkpoint was saved with use_cbam={} but the network has use_cbam={}",
                tagged, config.use_cbam
            )));
        }
    }

    if let Some(num_classes) = file.metadata.get("num_classes") {
        let tagged: usize = num_classes
            .parse()
            .map_err(|_| incompatible(format!("invalid num_classes tag '{}'", num_classes)))?;
        if tagged != config.num_classes {
            return Err(incompatible(format!(
                "checkpoint has {} classes but the network expects {}",
                tagged, config.num_classes
            )));
        }
    }

    Ok(())
}

/// Build the configured network and populate it from a checkpoint.
///
/// Every parameter of the network must be present with the exact shape, and the
/// checkpoint may not contain parameters the network lacks. The returned model is
/// bound to `device` and, because autodiff backends are refused, runs in
/// evaluation mode: dropout is the identity and batch norm uses running statistics.
pub fn load<B: Backend>(
    path: &Path,
    config: &ModelConfig,
    device: &B::Device,
) -> Result<RoadAnomalyNet<B>> {
    if B::ad_enabled() {
        return Err(RoadAnomalyError::Config(
            "checkpoints must be loaded on an inference backend; autodiff enables training behaviour"
                .to_string(),
        ));
    }
    config.validate()?;

    info!("Loading checkpoint from {:?}", path);
    let file = read_checkpoint(path)?;
    validate_tag(&file, config)?;

    let model = RoadAnomalyNet::<B>::new(config, device);
    let mut reader = ParamReader::new(file.params);
    let model = model.load_params(&mut reader);
    reader
        .finish()
        .map_err(|reason| RoadAnomalyError::incompatible(path, reason))?;

    info!(
        "Checkpoint loaded ({} layout, cbam: {}, classes: {})",
        file.layout,
        model.uses_cbam(),
        model.num_classes()
    );
    Ok(model)
}

/// Schema tag for a network configuration
pub fn schema_metadata(config: &ModelConfig) -> HashMap<String, String> {
    HashMap::from([
        ("format".to_string(), FORMAT_NAME.to_string()),
        ("format_version".to_string(), FORMAT_VERSION.to_string()),
        ("num_classes".to_string(), config.num_classes.to_string()),
        ("use_cbam".to_string(), config.use_cbam.to_string()),
    ])
}

/// Write a parameter store as a safetensors file
pub fn write_store(
    store: &ParamStore,
    metadata: &HashMap<String, String>,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let views = store
        .iter()
        .map(|(name, entry)| {
            TensorView::new(
                Dtype::F32,
                entry.shape.clone(),
                bytemuck::cast_slice(entry.values.as_slice()),
            )
            .map(|view| (name.clone(), view))
            .map_err(|e| {
                RoadAnomalyError::Serialization(format!("Invalid tensor '{}': {}", name, e))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata = (!metadata.is_empty()).then(|| metadata.clone());
    safetensors::tensor::serialize_to_file(views, &metadata, path)?;
    Ok(())
}

/// Dump the parameters of `model` as a tagged, bare checkpoint.
///
/// `extra` entries are added to the header (e.g. `epoch`); they never override the tag.
pub fn save<B: Backend>(
    model: &RoadAnomalyNet<B>,
    config: &ModelConfig,
    path: &Path,
    extra: Option<&HashMap<String, String>>,
) -> Result<()> {
    let store = model.export_params()?;

    let mut metadata = extra.cloned().unwrap_or_default();
    metadata.extend(schema_metadata(config));

    write_store(&store, &metadata, path)?;
    info!(
        "Checkpoint saved to {:?} ({} tensors, {} values)",
        path,
        store.len(),
        store.num_parameters()
    );
    Ok(())
}

/// Summary of a checkpoint's contents
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub layout: CheckpointLayout,
    pub metadata: HashMap<String, String>,
    /// (name, dtype, shape), sorted by name
    pub tensors: Vec<(String, String, Vec<usize>)>,
    pub num_parameters: usize,
    pub ignored_entries: usize,
}

/// List what a checkpoint contains
pub fn inspect(path: &Path) -> Result<CheckpointSummary> {
    let file = read_checkpoint(path)?;
    let tensors = file
        .params
        .iter()
        .map(|(name, entry)| (name.clone(), format!("{:?}", entry.dtype), entry.shape.clone()))
        .collect();

    Ok(CheckpointSummary {
        layout: file.layout,
        num_parameters: file.params.num_parameters(),
        metadata: file.metadata,
        tensors,
        ignored_entries: file.ignored_entries,
    })
}
