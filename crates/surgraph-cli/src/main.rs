//! Surgraph CLI - train and evaluate interaction graph networks.
//!
//! # Usage
//!
//! ```bash
//! # Write a synthetic dataset of one-frame safetensors files
//! surgraph synth -o data/train --samples 256
//!
//! # Train from a JSON config, overriding a few fields
//! surgraph train -c train.json --train data/train --valid data/valid --epochs 20
//!
//! # Smoke run on generated graphs
//! surgraph train --synthetic 64 --epochs 2 --cpu
//!
//! # Evaluate a checkpoint
//! surgraph evaluate -c train.json --checkpoint ckpt/model/epoch_19.safetensors --data data/valid
//!
//! # List instrument and action classes
//! surgraph classes
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` or pass `-v` for more detail.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::time::Instant;
use surgraph_core::ontology::{ACTION_CLASSES, INSTRUMENT_CLASSES};
use surgraph_core::GraphSample;
use surgraph_train::{
    GraphDataset, SafetensorsDataset, SyntheticConfig, SyntheticDataset, TrainConfig, Trainer,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "surgraph")]
#[command(about = "Surgical interaction graph parsing", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a network, checkpointing after every epoch
    Train {
        /// JSON training config (defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory of training samples (.safetensors)
        #[arg(long, requires = "valid", conflicts_with = "synthetic")]
        train: Option<PathBuf>,

        /// Directory of validation samples (.safetensors)
        #[arg(long, requires = "train", conflicts_with = "synthetic")]
        valid: Option<PathBuf>,

        /// Train on this many generated samples instead of files
        #[arg(long)]
        synthetic: Option<usize>,

        /// Last epoch, exclusive
        #[arg(long)]
        epochs: Option<usize>,

        /// Resume from this epoch
        #[arg(long)]
        start_epoch: Option<usize>,

        /// Samples per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Initial learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Checkpoint directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Shuffle seed
        #[arg(long)]
        seed: Option<u64>,

        /// Stay on the CPU even when CUDA is available
        #[arg(long)]
        cpu: bool,
    },

    /// Evaluate a checkpoint on a dataset
    Evaluate {
        /// JSON training config the checkpoint was trained with
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Checkpoint file (epoch_<N>.safetensors)
        #[arg(long)]
        checkpoint: PathBuf,

        /// Directory of samples (.safetensors)
        #[arg(long, conflicts_with = "synthetic")]
        data: Option<PathBuf>,

        /// Evaluate on this many generated samples instead of files
        #[arg(long)]
        synthetic: Option<usize>,

        /// Stay on the CPU even when CUDA is available
        #[arg(long)]
        cpu: bool,
    },

    /// Write a synthetic dataset
    Synth {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Number of samples
        #[arg(long, default_value = "64")]
        samples: usize,

        /// Node feature dimension
        #[arg(long, default_value = "200")]
        node_features: usize,

        /// Edge feature dimension
        #[arg(long, default_value = "200")]
        edge_features: usize,

        /// Action classes
        #[arg(long, default_value = "13")]
        classes: usize,

        /// Maximum humans per frame
        #[arg(long, default_value = "2")]
        max_humans: usize,

        /// Maximum objects per frame
        #[arg(long, default_value = "3")]
        max_objects: usize,

        /// Random seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// List instrument and action classes
    Classes,
}

/// Where samples come from.
enum Source {
    Files(SafetensorsDataset),
    Synthetic(SyntheticDataset),
}

impl GraphDataset for Source {
    fn len(&self) -> usize {
        match self {
            Source::Files(ds) => ds.len(),
            Source::Synthetic(ds) => ds.len(),
        }
    }

    fn get(&self, index: usize) -> surgraph_core::Result<GraphSample> {
        match self {
            Source::Files(ds) => ds.get(index),
            Source::Synthetic(ds) => ds.get(index),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Train {
            config,
            train,
            valid,
            synthetic,
            epochs,
            start_epoch,
            batch_size,
            lr,
            checkpoint_dir,
            seed,
            cpu,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(epochs) = epochs {
                cfg.epochs = epochs;
            }
            if let Some(epoch) = start_epoch {
                cfg.start_epoch = epoch;
            }
            if let Some(batch_size) = batch_size {
                cfg.batch_size = batch_size;
            }
            if let Some(lr) = lr {
                cfg.learning_rate = lr;
            }
            if let Some(dir) = checkpoint_dir {
                cfg.checkpoint_dir = dir;
            }
            if let Some(seed) = seed {
                cfg.seed = seed;
            }
            if cpu {
                cfg.use_accelerator = false;
            }
            cfg.validate().context("Invalid training configuration")?;
            cmd_train(cfg, train, valid, synthetic)
        }
        Commands::Evaluate {
            config,
            checkpoint,
            data,
            synthetic,
            cpu,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if cpu {
                cfg.use_accelerator = false;
            }
            cmd_evaluate(cfg, &checkpoint, data, synthetic)
        }
        Commands::Synth {
            output,
            samples,
            node_features,
            edge_features,
            classes,
            max_humans,
            max_objects,
            seed,
        } => cmd_synth(
            &output,
            SyntheticConfig {
                samples,
                max_humans,
                max_objects,
                node_feature_size: node_features,
                edge_feature_size: edge_features,
                action_classes: classes,
                seed,
            },
        ),
        Commands::Classes => cmd_classes(),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<TrainConfig> {
    match path {
        Some(path) => TrainConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(TrainConfig::default()),
    }
}

fn open_dataset(dir: &Path) -> Result<Source> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Indexing {}...", dir.display()));

    let ds = SafetensorsDataset::open(dir)
        .with_context(|| format!("Failed to open dataset {}", dir.display()))?;
    // Fail early on unreadable files rather than mid-epoch.
    ds.get(0)
        .with_context(|| format!("Failed to read {}", ds.files()[0].display()))?;

    pb.finish_with_message(format!(
        "Indexed {} samples in {:.2?}",
        ds.len(),
        start.elapsed()
    ));
    Ok(Source::Files(ds))
}

fn synthetic_source(cfg: &TrainConfig, samples: usize, seed: u64) -> Result<Source> {
    let ds = SyntheticDataset::new(SyntheticConfig {
        samples,
        node_feature_size: cfg.model.node_feature_size,
        edge_feature_size: cfg.model.edge_feature_size,
        action_classes: cfg.model.action_classes,
        seed,
        ..Default::default()
    })?;
    Ok(Source::Synthetic(ds))
}

fn cmd_train(
    cfg: TrainConfig,
    train: Option<PathBuf>,
    valid: Option<PathBuf>,
    synthetic: Option<usize>,
) -> Result<()> {
    let (train_set, valid_set) = match (train, valid, synthetic) {
        (Some(train), Some(valid), None) => (open_dataset(&train)?, open_dataset(&valid)?),
        (None, None, Some(samples)) => (
            synthetic_source(&cfg, samples, cfg.seed)?,
            synthetic_source(&cfg, (samples / 4).max(1), cfg.seed.wrapping_add(1))?,
        ),
        _ => bail!("Pass either --train and --valid, or --synthetic"),
    };

    info!(
        train = train_set.len(),
        valid = valid_set.len(),
        epochs = cfg.epochs,
        "starting training"
    );
    let start = Instant::now();
    let checkpoint_dir = cfg.checkpoint_dir.clone();
    let mut trainer = Trainer::new(cfg)?;
    let report = trainer
        .fit(&train_set, &valid_set)
        .context("Training failed")?;

    println!("Training Summary");
    println!("================");
    println!("Epochs run:          {}", report.validation.len());
    match report.best.epoch {
        Some(epoch) => println!("Best epoch:          {}", epoch),
        None => println!("Best epoch:          -"),
    }
    println!("Mean Avg Precision:  {:.4}", report.best.mean_average_precision);
    println!("Best loss:           {:.4}", report.best.loss);
    println!("Final learning rate: {:.3e}", report.final_learning_rate);
    println!("Checkpoints:         {}", checkpoint_dir.display());
    println!("Elapsed:             {:.2?}", start.elapsed());
    Ok(())
}

fn cmd_evaluate(
    cfg: TrainConfig,
    checkpoint: &Path,
    data: Option<PathBuf>,
    synthetic: Option<usize>,
) -> Result<()> {
    let dataset = match (data, synthetic) {
        (Some(dir), None) => open_dataset(&dir)?,
        (None, Some(samples)) => synthetic_source(&cfg, samples, cfg.seed)?,
        _ => bail!("Pass either --data or --synthetic"),
    };

    let mut trainer = Trainer::new(cfg)?;
    trainer
        .load(checkpoint)
        .with_context(|| format!("Failed to load checkpoint {}", checkpoint.display()))?;
    let summary = trainer.validate(&dataset, 0).context("Evaluation failed")?;

    println!("Evaluation");
    println!("==========");
    println!("Samples:            {}", dataset.len());
    println!("Detections:         {}", summary.detections);
    println!("Mean Avg Precision: {:.4}", summary.mean_average_precision);
    println!("Mean Loss:          {:.4}", summary.mean_loss);
    println!("Batch time:         {:.4}s", summary.batch_time);
    Ok(())
}

fn cmd_synth(output: &Path, config: SyntheticConfig) -> Result<()> {
    let dataset = SyntheticDataset::new(config)?;
    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let start = Instant::now();
    let pb = ProgressBar::new(dataset.len() as u64);
    for i in 0..dataset.len() {
        let sample = dataset.get(i)?;
        let path = output.join(format!("{i:06}.safetensors"));
        SafetensorsDataset::write_sample(&sample, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "Wrote {} samples to {} in {:.2?}",
        dataset.len(),
        output.display(),
        start.elapsed()
    );
    Ok(())
}

fn cmd_classes() -> Result<()> {
    println!("Instruments");
    println!("===========");
    for (i, name) in INSTRUMENT_CLASSES.iter().enumerate() {
        let name = if name.is_empty() { "(background)" } else { name };
        println!("{:>3}  {}", i, name);
    }
    println!();
    println!("Actions");
    println!("=======");
    for (i, name) in ACTION_CLASSES.iter().enumerate() {
        println!("{:>3}  {}", i, name);
    }
    Ok(())
}
