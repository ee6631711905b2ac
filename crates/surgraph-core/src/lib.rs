#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::uninlined_format_args)]

//! Core types for surgical interaction graph parsing.
//!
//! A frame of surgical video becomes a small heterogeneous graph: instrument
//! ("human") nodes that act, and context ("object") nodes they act on. This
//! crate provides the data layer shared by the network and the trainer:
//!
//! - [`GraphSample`] - One frame: node/edge features, adjacency, action labels
//! - [`GraphBatch`] - Samples zero-padded to a common node count and stacked
//! - [`NodeMask`] - Validity tensors derived once per batch from node counts
//! - [`GpnnConfig`] - Network hyperparameters, passed explicitly
//! - [`ontology`] - Instrument and action class names
//!
//! # Example
//!
//! ```rust
//! use candle_core::{DType, Device, Tensor};
//! use surgraph_core::{GraphBatch, GraphSample};
//!
//! let device = Device::Cpu;
//! let sample = GraphSample::new(
//!     "seq_1/frame000",
//!     Tensor::zeros((3, 3, 8), DType::F32, &device)?,
//!     Tensor::zeros((3, 4), DType::F32, &device)?,
//!     Tensor::zeros((3, 3), DType::F32, &device)?,
//!     Tensor::zeros((3, 13), DType::F32, &device)?,
//!     2,
//!     1,
//! )?;
//! let batch = GraphBatch::collate(&[sample], &device)?;
//! assert_eq!(batch.max_nodes(), 3);
//! # Ok::<(), surgraph_core::Error>(())
//! ```

pub mod config;
mod error;
pub mod graph;
pub mod mask;
pub mod ontology;

pub use config::GpnnConfig;
pub use error::{Error, Result};
pub use graph::{GraphBatch, GraphSample};
pub use mask::{is_valid_interaction, NodeMask};
