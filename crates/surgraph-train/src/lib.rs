//! # surgraph-train
//!
//! Loss, detection extraction, evaluation and the training loop for the
//! surgical interaction graph network.
//!
//! | Module | Provides |
//! |--------|----------|
//! | [`loss`] | weighted multi-label soft-margin loss |
//! | [`detection`] | thresholded human→object detections |
//! | [`metrics`] | [`AverageMeter`], per-class AP, [`MapAccumulator`] |
//! | [`dataset`] | [`GraphDataset`] sources and [`DataLoader`] |
//! | [`checkpoint`] | `epoch_<N>.safetensors` save and load |
//! | [`trainer`] | [`Trainer`] with resume, plateau decay, best tracking |
//!
//! ## Example
//!
//! ```rust,no_run
//! use surgraph_core::GpnnConfig;
//! use surgraph_train::{SyntheticConfig, SyntheticDataset, TrainConfig, Trainer};
//!
//! let model = GpnnConfig::default().with_feature_sizes(16, 16).with_message_size(16);
//! let config = TrainConfig::default().with_epochs(2).with_model(model);
//! let data = SyntheticDataset::new(SyntheticConfig {
//!     node_feature_size: 16,
//!     edge_feature_size: 16,
//!     ..Default::default()
//! })?;
//!
//! let mut trainer = Trainer::new(config)?;
//! let report = trainer.fit(&data, &data)?;
//! println!("best mAP {:.4}", report.best.mean_average_precision);
//! # Ok::<(), surgraph_core::Error>(())
//! ```

#![allow(clippy::needless_range_loop)]

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod detection;
pub mod loss;
pub mod metrics;
pub mod trainer;

pub use checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint};
pub use config::TrainConfig;
pub use dataset::{
    DataLoader, GraphDataset, InMemoryDataset, SafetensorsDataset, SyntheticConfig,
    SyntheticDataset,
};
pub use detection::{extract_detections, stable_sigmoid, Detection, DEFAULT_THRESHOLD};
pub use loss::{weighted_multilabel_loss, LossReduction};
pub use metrics::{average_precision, mean_average_precision, AverageMeter, MapAccumulator};
pub use trainer::{BestEpoch, EpochSummary, FitReport, PlateauDecay, Trainer};
