//! Error types for surgraph.

use thiserror::Error;

/// Surgraph error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A tensor has the wrong rank or layout.
    #[error("bad shape for {what}: expected {expected}, got {got:?}")]
    Shape {
        what: &'static str,
        expected: &'static str,
        got: Vec<usize>,
    },

    /// Valid node counts exceed the padded node dimension.
    #[error("sample {identifier}: {humans} humans + {objects} objects exceed {max_nodes} node slots")]
    NodeCount {
        identifier: String,
        humans: usize,
        objects: usize,
        max_nodes: usize,
    },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A batch was requested from zero samples.
    #[error("cannot build a batch from zero samples")]
    EmptyBatch,

    /// The dataset has no samples.
    #[error("dataset is empty: {0}")]
    EmptyDataset(String),

    /// Loss became NaN or infinite.
    #[error("non-finite loss {value} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, value: f32 },

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
