//! Road Anomaly Classification CLI
//!
//! Entry point for classifying road-surface photographs and for inspecting or
//! generating checkpoint files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::tensor::backend::Backend;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use road_anomaly::backend::{backend_name, cpu_device, CpuBackend};
use road_anomaly::checkpoint;
use road_anomaly::inference::is_image_file;
use road_anomaly::utils::format_number;
use road_anomaly::utils::logging::{init_logging, LogConfig, ProgressLogger};
use road_anomaly::{DeviceKind, InferenceConfig, ModelConfig, Predictor, RoadAnomalyError, RoadAnomalyNet};

/// Road-surface anomaly classification (EfficientNet-B3 + CBAM)
#[derive(Parser, Debug)]
#[command(name = "road_anomaly")]
#[command(version)]
#[command(about = "Classify road-surface photographs with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// JSON inference configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device to run on (cpu, accelerator)
    #[arg(long, global = true)]
    device: Option<String>,

    /// Build the network without the CBAM attention block
    #[arg(long, global = true, default_value = "false")]
    no_cbam: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a single image or every image in a directory
    Predict {
        /// Path to input image or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Path to the safetensors checkpoint
        #[arg(short = 'm', long)]
        checkpoint: Option<PathBuf>,

        /// Print results as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Show what a checkpoint contains and whether it fits the configured network
    Inspect {
        /// Path to the safetensors checkpoint
        #[arg(short = 'm', long)]
        checkpoint: Option<PathBuf>,
    },

    /// Write a randomly-initialized checkpoint for the configured network
    InitCheckpoint {
        /// Output checkpoint path
        #[arg(short, long)]
        output: PathBuf,

        /// Use the small test topology instead of EfficientNet-B3
        #[arg(long, default_value = "false")]
        tiny: bool,

        /// Also write a matching inference configuration to this path
        #[arg(long)]
        config_out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => InferenceConfig::load(path)
            .with_context(|| format!("Failed to load configuration {:?}", path))?,
        None => InferenceConfig::default(),
    };
    if let Some(device) = &cli.device {
        config.device = device.parse()?;
    }
    if cli.no_cbam {
        config.model.use_cbam = false;
    }

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default().with_level(config.log_level())
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Predict {
            input,
            checkpoint,
            json,
        } => {
            if let Some(path) = checkpoint {
                config.checkpoint_path = path;
            }
            if !json {
                print_banner();
            }
            match config.device {
                DeviceKind::Cpu => cmd_predict::<CpuBackend>(&config, cpu_device(), &input, json)?,
                DeviceKind::Accelerator => predict_on_accelerator(&config, &input, json)?,
            }
        }

        Commands::Inspect { checkpoint } => {
            if let Some(path) = checkpoint {
                config.checkpoint_path = path;
            }
            cmd_inspect(&config)?;
        }

        Commands::InitCheckpoint {
            output,
            tiny,
            config_out,
        } => {
            if tiny {
                config.model = ModelConfig::tiny().with_cbam(config.model.use_cbam);
            }
            config.checkpoint_path = output;
            cmd_init_checkpoint(&config, config_out.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(feature = "cuda")]
fn predict_on_accelerator(config: &InferenceConfig, input: &Path, json: bool) -> Result<()> {
    use road_anomaly::backend::{accelerator_device, AcceleratorBackend};
    cmd_predict::<AcceleratorBackend>(config, accelerator_device(), input, json)
}

#[cfg(not(feature = "cuda"))]
fn predict_on_accelerator(_config: &InferenceConfig, _input: &Path, _json: bool) -> Result<()> {
    Err(RoadAnomalyError::Device(
        "accelerator requested but this binary was built without the `cuda` feature".to_string(),
    )
    .into())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   Road Anomaly Classifier                                   |
 |   EfficientNet-B3 + CBAM with Burn + Rust                   |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.exists() {
        bail!("Input path not found: {:?}", input);
    }
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_image_file(p))
        .collect();
    files.sort();
    Ok(files)
}

fn cmd_predict<B: Backend>(
    config: &InferenceConfig,
    device: B::Device,
    input: &Path,
    json: bool,
) -> Result<()> {
    let accelerator = config.device == DeviceKind::Accelerator;
    info!("Running inference");
    info!("  Input: {:?}", input);
    info!("  Checkpoint: {:?}", config.checkpoint_path);

    if !json {
        println!("{}", "Inference Configuration:".cyan().bold());
        println!("  Input:      {}", input.display());
        println!("  Checkpoint: {}", config.checkpoint_path.display());
        println!("  Backend:    {}", backend_name(accelerator));
        println!("  CBAM:       {}", config.model.use_cbam);
        println!();
    }

    let files = collect_inputs(input)?;
    let predictor = Predictor::<B>::load(&config.checkpoint_path, &config.model, device)?;

    if !input.is_dir() {
        let prediction = predictor.predict_file(&files[0])?;
        if json {
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        } else {
            print!("{}", prediction.display());
        }
        return Ok(());
    }

    let mut progress = ProgressLogger::new("Predict", files.len());
    let mut records = Vec::with_capacity(files.len());
    for (path, result) in predictor.predict_batch(&files) {
        progress.increment();
        match result {
            Ok(prediction) => {
                if !json {
                    println!(
                        "{} {} ({:.1}%)",
                        format!("{}:", path.display()).bold(),
                        prediction.predicted_label.to_string().green(),
                        prediction.confidence * 100.0
                    );
                }
                records.push(serde_json::json!({ "path": path, "prediction": prediction }));
            }
            Err(e) => {
                if !json {
                    println!("{} {}: {}", "Error:".red(), path.display(), e);
                }
                records.push(serde_json::json!({ "path": path, "error": e.to_string() }));
            }
        }
    }
    progress.finish();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    }
    Ok(())
}

fn cmd_inspect(config: &InferenceConfig) -> Result<()> {
    let path = &config.checkpoint_path;
    let summary = checkpoint::inspect(path)?;

    println!("{}", "Checkpoint:".cyan().bold());
    println!("  Path:       {}", path.display());
    println!("  Layout:     {}", summary.layout);
    println!("  Tensors:    {}", format_number(summary.tensors.len()));
    println!("  Parameters: {}", format_number(summary.num_parameters));
    if summary.ignored_entries > 0 {
        println!("  Ignored:    {} non-model entries", summary.ignored_entries);
    }

    println!();
    println!("{}", "Header metadata:".cyan().bold());
    if summary.metadata.is_empty() {
        println!("  (none)");
    }
    let mut metadata: Vec<_> = summary.metadata.iter().collect();
    metadata.sort();
    for (key, value) in metadata {
        println!("  {:<16} {}", key, value);
    }

    println!();
    println!("{}", "Tensors:".cyan().bold());
    for (name, dtype, shape) in &summary.tensors {
        println!("  {:<60} {:<5} {:?}", name, dtype, shape);
    }

    println!();
    match checkpoint::load::<CpuBackend>(path, &config.model, &cpu_device()) {
        Ok(_) => println!(
            "{} matches the configured network (cbam: {})",
            "OK:".green().bold(),
            config.model.use_cbam
        ),
        Err(e) => println!("{} {}", "Incompatible:".red().bold(), e),
    }
    Ok(())
}

fn cmd_init_checkpoint(config: &InferenceConfig, config_out: Option<&Path>) -> Result<()> {
    config.model.validate()?;
    let model = RoadAnomalyNet::<CpuBackend>::new(&config.model, &cpu_device());

    let extra = HashMap::from([("initialization".to_string(), "random".to_string())]);
    checkpoint::save(&model, &config.model, &config.checkpoint_path, Some(&extra))?;
    println!(
        "{} wrote randomly-initialized checkpoint to {}",
        "Done:".green().bold(),
        config.checkpoint_path.display()
    );

    if let Some(path) = config_out {
        config.save(path)?;
        println!("  Configuration written to {}", path.display());
    }
    Ok(())
}
