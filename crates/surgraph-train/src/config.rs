//! Training configuration.

use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};
use surgraph_core::{Error, GpnnConfig, Result};

use crate::detection::DEFAULT_THRESHOLD;
use crate::loss::LossReduction;

/// Training configuration.
///
/// Loaded from JSON with [`TrainConfig::from_json_file`]; missing fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Samples per batch (default: 1).
    pub batch_size: usize,
    /// Initial learning rate (default: 1e-5).
    pub learning_rate: f64,
    /// Factor applied to the learning rate on a validation plateau (default: 0.6).
    pub lr_decay: f64,
    /// Last epoch, exclusive (default: 100).
    pub epochs: usize,
    /// First epoch; `epoch_<start_epoch - 1>` is resumed when present (default: 0).
    pub start_epoch: usize,
    /// Extra weight on positive labels (default: 100).
    pub link_weight: f64,
    /// How per-sample losses combine (default: sum).
    pub loss_reduction: LossReduction,
    /// Link probability above which a pair is a detection (default: 0.5).
    pub detection_threshold: f32,
    /// Directory for `epoch_<N>.safetensors` (default: `ckpt/model`).
    pub checkpoint_dir: PathBuf,
    /// Use CUDA device 0 when available (default: true).
    pub use_accelerator: bool,
    /// Batches between progress lines (default: 200).
    pub log_interval: usize,
    /// Shuffle seed (default: 0).
    pub seed: u64,
    /// Shuffle training samples each epoch (default: true).
    pub shuffle: bool,
    /// Drop the trailing partial training batch (default: true).
    pub drop_last: bool,
    /// Network configuration.
    pub model: GpnnConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            learning_rate: 1e-5,
            lr_decay: 0.6,
            epochs: 100,
            start_epoch: 0,
            link_weight: 100.0,
            loss_reduction: LossReduction::Sum,
            detection_threshold: DEFAULT_THRESHOLD,
            checkpoint_dir: PathBuf::from("ckpt/model"),
            use_accelerator: true,
            log_interval: 200,
            seed: 0,
            shuffle: true,
            drop_last: true,
            model: GpnnConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Read and validate a JSON config.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.lr_decay > 0.0 && self.lr_decay <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "lr_decay must be in (0, 1], got {}",
                self.lr_decay
            )));
        }
        if !(self.link_weight.is_finite() && self.link_weight >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "link_weight must be non-negative, got {}",
                self.link_weight
            )));
        }
        if !(0.0..1.0).contains(&self.detection_threshold) {
            return Err(Error::InvalidConfig(format!(
                "detection_threshold must be in [0, 1), got {}",
                self.detection_threshold
            )));
        }
        if self.start_epoch > self.epochs {
            return Err(Error::InvalidConfig(format!(
                "start_epoch {} is past epochs {}",
                self.start_epoch, self.epochs
            )));
        }
        if self.log_interval == 0 {
            return Err(Error::InvalidConfig("log_interval must be positive".into()));
        }
        self.model.validate()
    }

    /// CUDA device 0 when requested and available, else CPU.
    pub fn device(&self) -> Device {
        if self.use_accelerator {
            Device::cuda_if_available(0).unwrap_or(Device::Cpu)
        } else {
            Device::Cpu
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_start_epoch(mut self, epoch: usize) -> Self {
        self.start_epoch = epoch;
        self
    }

    pub fn with_link_weight(mut self, weight: f64) -> Self {
        self.link_weight = weight;
        self
    }

    pub fn with_loss_reduction(mut self, reduction: LossReduction) -> Self {
        self.loss_reduction = reduction;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_accelerator(mut self, enabled: bool) -> Self {
        self.use_accelerator = enabled;
        self
    }

    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_model(mut self, model: GpnnConfig) -> Self {
        self.model = model;
        self
    }
}
