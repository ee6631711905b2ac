//! Training and validation loop.
//!
//! Per epoch:
//!
//! 1. One pass over the training set in [`ForwardMode::Train`], with an
//!    AdamW step per batch.
//! 2. One pass over the validation set in [`ForwardMode::Eval`].
//! 3. A checkpoint `epoch_<N>.safetensors`.
//! 4. Best-epoch bookkeeping and learning-rate decay on a plateau.
//!
//! Validation error is `1 - mAP`. Errors are averaged over consecutive pairs
//! of epochs; when a pair's average improves on the previous pair's by less
//! than [`PLATEAU_THRESHOLD`], the learning rate is multiplied by `lr_decay`.

use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use surgraph_core::{Error, Result};
use surgraph_nn::{ForwardMode, Gpnn};
use tracing::{debug, info, warn};

use crate::checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint};
use crate::config::TrainConfig;
use crate::dataset::{DataLoader, GraphDataset};
use crate::detection::extract_detections;
use crate::loss::weighted_multilabel_loss;
use crate::metrics::{AverageMeter, MapAccumulator};

/// Minimum improvement of the paired validation error before decaying.
pub const PLATEAU_THRESHOLD: f64 = 0.005;

/// Results of one pass over a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub mean_average_precision: f64,
    /// Training: per-batch loss weighted by batch size. Validation: loss of
    /// batches with detections, weighted by detection count.
    pub mean_loss: f64,
    /// Detected human→object pairs over the pass.
    pub detections: usize,
    /// Mean seconds per batch.
    pub batch_time: f64,
}

/// Best validation epoch so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestEpoch {
    pub epoch: Option<usize>,
    pub mean_average_precision: f64,
    pub loss: f64,
}

impl Default for BestEpoch {
    fn default() -> Self {
        Self {
            epoch: None,
            mean_average_precision: 0.0,
            loss: f64::INFINITY,
        }
    }
}

impl BestEpoch {
    /// Record a validation pass; returns true when it becomes the best.
    pub fn observe(&mut self, summary: &EpochSummary) -> bool {
        let error = 1.0 - summary.mean_average_precision;
        let best_error = 1.0 - self.mean_average_precision;
        if self.epoch.is_none() || error < best_error {
            self.epoch = Some(summary.epoch);
            self.mean_average_precision = summary.mean_average_precision;
            self.loss = summary.mean_loss;
            true
        } else {
            false
        }
    }
}

/// Learning-rate decay on a validation plateau.
#[derive(Debug, Clone)]
pub struct PlateauDecay {
    window: Vec<f64>,
    average: f64,
    threshold: f64,
}

impl Default for PlateauDecay {
    fn default() -> Self {
        Self::new(PLATEAU_THRESHOLD)
    }
}

impl PlateauDecay {
    pub fn new(threshold: f64) -> Self {
        Self {
            window: Vec::with_capacity(2),
            average: f64::INFINITY,
            threshold,
        }
    }

    /// Record one epoch's validation error; true means decay now.
    pub fn observe(&mut self, error: f64) -> bool {
        self.window.push(error);
        if self.window.len() < 2 {
            return false;
        }
        let average = self.window.iter().sum::<f64>() / self.window.len() as f64;
        let decay = self.average - average < self.threshold;
        self.average = average;
        self.window.clear();
        decay
    }
}

/// Everything [`Trainer::fit`] produced.
#[derive(Debug, Clone)]
pub struct FitReport {
    pub train: Vec<EpochSummary>,
    pub validation: Vec<EpochSummary>,
    pub best: BestEpoch,
    pub final_learning_rate: f64,
}

/// Owns the network, its parameters and the optimizer.
pub struct Trainer {
    config: TrainConfig,
    device: Device,
    varmap: VarMap,
    model: Gpnn,
    optimizer: AdamW,
    best: BestEpoch,
    plateau: PlateauDecay,
}

impl Trainer {
    /// Build a freshly initialized network on the configured device.
    pub fn new(config: TrainConfig) -> Result<Self> {
        let device = config.device();
        Self::with_device(config, device)
    }

    pub fn with_device(config: TrainConfig, device: Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Gpnn::new(config.model.clone(), vb)?;
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;
        info!(
            device = ?device,
            parameters = varmap.all_vars().iter().map(|v| v.elem_count()).sum::<usize>(),
            "initialized network"
        );
        Ok(Self {
            config,
            device,
            varmap,
            model,
            optimizer,
            best: BestEpoch::default(),
            plateau: PlateauDecay::default(),
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn model(&self) -> &Gpnn {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Restore parameters from a checkpoint file.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        load_checkpoint(&mut self.varmap, path)
    }

    /// Load `epoch_<start_epoch - 1>` if it exists. Returns whether it did.
    pub fn resume(&mut self) -> Result<bool> {
        let Some(previous) = self.config.start_epoch.checked_sub(1) else {
            return Ok(false);
        };
        let path = checkpoint_path(&self.config.checkpoint_dir, previous);
        if !path.exists() {
            warn!(path = %path.display(), "no checkpoint to resume from, starting fresh");
            return Ok(false);
        }
        self.load(path)?;
        Ok(true)
    }

    /// One optimization pass over `dataset`.
    pub fn train_epoch<D: GraphDataset>(&mut self, dataset: &D, epoch: usize) -> Result<EpochSummary> {
        let loader = DataLoader::new(dataset, self.config.batch_size, self.device.clone())
            .with_shuffle(self.config.shuffle, self.config.seed)
            .with_drop_last(self.config.drop_last);
        if loader.is_empty() {
            return Err(Error::EmptyDataset(format!(
                "{} training samples give no batch of size {}",
                dataset.len(),
                self.config.batch_size
            )));
        }

        let classes = self.config.model.action_classes;
        let mut batch_time = AverageMeter::new();
        let mut data_time = AverageMeter::new();
        let mut losses = AverageMeter::new();
        let mut map = MapAccumulator::new(classes);
        let mut detections = 0;

        let mut tick = Instant::now();
        for (i, batch) in loader.epoch(epoch).enumerate() {
            let batch = batch?;
            data_time.update(tick.elapsed().as_secs_f64(), 1);

            let output = self.model.forward(&batch, ForwardMode::Train)?;
            let mask = batch.mask()?;
            let loss = weighted_multilabel_loss(
                &output.node_logits,
                &batch.node_labels,
                &mask,
                self.config.link_weight,
                self.config.loss_reduction,
            )?;
            let value = loss.to_scalar::<f32>()?;
            if !value.is_finite() {
                return Err(Error::NonFiniteLoss {
                    epoch,
                    batch: i,
                    value,
                });
            }
            self.optimizer.backward_step(&loss)?;
            losses.update(value as f64, batch.batch_size());

            let found = extract_detections(
                &output.adjacency,
                &batch.human_counts,
                &batch.object_counts,
                self.config.detection_threshold,
            )?;
            detections += found.len();
            map.add_detections(&found, &output.node_logits, &batch.node_labels)?;

            batch_time.update(tick.elapsed().as_secs_f64(), 1);
            tick = Instant::now();

            if should_log(i, self.config.log_interval) {
                info!(
                    epoch,
                    batch = i + 1,
                    batches = loader.len(),
                    loss = losses.avg,
                    batch_time = batch_time.avg,
                    data_time = data_time.avg,
                    map = map.mean_average_precision(),
                    rows = map.rows(),
                    "train"
                );
            }
        }

        let summary = EpochSummary {
            epoch,
            mean_average_precision: map.mean_average_precision(),
            mean_loss: losses.avg,
            detections,
            batch_time: batch_time.avg,
        };
        info!(
            epoch,
            map = summary.mean_average_precision,
            loss = summary.mean_loss,
            detections,
            "train epoch done"
        );
        Ok(summary)
    }

    /// One evaluation pass over `dataset`. Parameters are not touched.
    pub fn validate<D: GraphDataset>(&self, dataset: &D, epoch: usize) -> Result<EpochSummary> {
        let loader = DataLoader::new(dataset, self.config.batch_size, self.device.clone());
        if loader.is_empty() {
            return Err(Error::EmptyDataset("validation set has no samples".into()));
        }

        let classes = self.config.model.action_classes;
        let mut batch_time = AverageMeter::new();
        let mut losses = AverageMeter::new();
        let mut map = MapAccumulator::new(classes);
        let mut detections = 0;

        let mut tick = Instant::now();
        for (i, batch) in loader.epoch(epoch).enumerate() {
            let batch = batch?;
            let output = self.model.forward(&batch, ForwardMode::Eval)?;
            let found = extract_detections(
                &output.adjacency,
                &batch.human_counts,
                &batch.object_counts,
                self.config.detection_threshold,
            )?;

            if !found.is_empty() {
                let mask = batch.mask()?;
                let loss = weighted_multilabel_loss(
                    &output.node_logits,
                    &batch.node_labels,
                    &mask,
                    self.config.link_weight,
                    self.config.loss_reduction,
                )?;
                losses.update(loss.to_scalar::<f32>()? as f64, found.len());
                map.add_detections(&found, &output.node_logits, &batch.node_labels)?;
                detections += found.len();
            }

            batch_time.update(tick.elapsed().as_secs_f64(), 1);
            tick = Instant::now();

            if should_log(i, self.config.log_interval) {
                debug!(
                    epoch,
                    batch = i + 1,
                    batches = loader.len(),
                    loss = losses.avg,
                    rows = map.rows(),
                    "validate"
                );
            }
        }

        let summary = EpochSummary {
            epoch,
            mean_average_precision: map.mean_average_precision(),
            mean_loss: losses.avg,
            detections,
            batch_time: batch_time.avg,
        };
        info!(
            epoch,
            map = summary.mean_average_precision,
            loss = summary.mean_loss,
            detections,
            "validation done"
        );
        Ok(summary)
    }

    /// Train from `start_epoch` to `epochs`, validating and checkpointing
    /// after every epoch.
    pub fn fit<T: GraphDataset, V: GraphDataset>(&mut self, train: &T, valid: &V) -> Result<FitReport> {
        if self.resume()? {
            info!(start_epoch = self.config.start_epoch, "resumed");
        }

        let mut report = FitReport {
            train: Vec::new(),
            validation: Vec::new(),
            best: self.best,
            final_learning_rate: self.learning_rate(),
        };

        for epoch in self.config.start_epoch..self.config.epochs {
            let train_summary = self.train_epoch(train, epoch)?;
            save_checkpoint(&self.varmap, &self.config.checkpoint_dir, epoch)?;
            let valid_summary = self.validate(valid, epoch)?;

            if self.best.observe(&valid_summary) {
                info!(epoch, map = valid_summary.mean_average_precision, "new best epoch");
            }
            info!(
                best_epoch = ?self.best.epoch,
                best_map = self.best.mean_average_precision,
                best_loss = self.best.loss,
                "best so far"
            );

            if self.plateau.observe(1.0 - valid_summary.mean_average_precision) {
                let lr = self.learning_rate() * self.config.lr_decay;
                self.optimizer.set_learning_rate(lr);
                info!(epoch, learning_rate = lr, "validation plateau, decayed learning rate");
            }

            report.train.push(train_summary);
            report.validation.push(valid_summary);
        }

        report.best = self.best;
        report.final_learning_rate = self.learning_rate();
        Ok(report)
    }
}

/// Batch `0` is always logged, then every `interval` batches.
fn should_log(batch: usize, interval: usize) -> bool {
    batch % interval == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plateau_decay_pairs() {
        let mut p = PlateauDecay::default();
        // First pair compares against infinity.
        assert!(!p.observe(0.9));
        assert!(!p.observe(0.7));
        // Average 0.8 -> 0.6: large improvement.
        assert!(!p.observe(0.6));
        assert!(!p.observe(0.6));
        // Average 0.6 -> 0.598: below threshold.
        assert!(!p.observe(0.598));
        assert!(p.observe(0.598));
    }

    #[test]
    fn test_log_cadence_starts_at_first_batch() {
        assert!(should_log(0, 200));
        assert!(!should_log(1, 200));
        assert!(!should_log(199, 200));
        assert!(should_log(200, 200));
        assert!((0..5).all(|i| should_log(i, 1)));
    }

    #[test]
    fn test_best_epoch_tracking() {
        let summary = |epoch, map| EpochSummary {
            epoch,
            mean_average_precision: map,
            mean_loss: 1.0,
            detections: 0,
            batch_time: 0.0,
        };
        let mut best = BestEpoch::default();
        assert!(best.observe(&summary(0, 0.0)));
        assert!(best.observe(&summary(1, 0.3)));
        assert!(!best.observe(&summary(2, 0.3)));
        assert!(!best.observe(&summary(3, 0.1)));
        assert_eq!(best.epoch, Some(1));
        assert_eq!(best.mean_average_precision, 0.3);
    }
}
