//! Validity masks for padded graph batches.
//!
//! Samples in a batch have different numbers of valid nodes but share one
//! padded node dimension `N`. Node `k` of sample `b` is valid iff
//! `k < human_count[b] + object_count[b]`. Humans occupy
//! `[0, human_count)` and objects `[human_count, human_count + object_count)`.
//!
//! The mask is built once per batch and applied before every aggregation:
//!
//! | Tensor | Shape | 1.0 where |
//! |--------|-------|-----------|
//! | `nodes` | `[B, N]` | node is valid |
//! | `pairs` | `[B, N, N]` | both endpoints valid and `i != j` |
//!
//! Human→object validity is a host-side predicate,
//! [`is_valid_interaction`], applied when detections are extracted.

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// Whether `(source, target)` is a human→object pair for a sample with the
/// given counts.
pub fn is_valid_interaction(source: usize, target: usize, humans: usize, objects: usize) -> bool {
    source < humans && target >= humans && target - humans < objects
}

/// Per-batch validity tensors derived from human/object counts.
#[derive(Debug, Clone)]
pub struct NodeMask {
    nodes: Tensor,
    pairs: Tensor,
    human_counts: Vec<usize>,
    object_counts: Vec<usize>,
    max_nodes: usize,
}

impl NodeMask {
    /// Build masks for a batch padded to `max_nodes`.
    pub fn new(
        human_counts: &[usize],
        object_counts: &[usize],
        max_nodes: usize,
        device: &Device,
    ) -> Result<Self> {
        if human_counts.len() != object_counts.len() {
            return Err(Error::DimensionMismatch {
                what: "object_counts",
                expected: human_counts.len(),
                got: object_counts.len(),
            });
        }
        let batch = human_counts.len();
        let mut nodes = vec![0f32; batch * max_nodes];
        let mut pairs = vec![0f32; batch * max_nodes * max_nodes];

        for (b, (&humans, &objects)) in human_counts.iter().zip(object_counts).enumerate() {
            let valid = match humans.checked_add(objects) {
                Some(valid) if valid <= max_nodes => valid,
                _ => {
                    return Err(Error::NodeCount {
                        identifier: format!("batch index {b}"),
                        humans,
                        objects,
                        max_nodes,
                    })
                }
            };
            nodes[b * max_nodes..b * max_nodes + valid].fill(1.0);
            let base = b * max_nodes * max_nodes;
            for i in 0..valid {
                for j in 0..valid {
                    if i != j {
                        pairs[base + i * max_nodes + j] = 1.0;
                    }
                }
            }
        }

        Ok(Self {
            nodes: Tensor::from_vec(nodes, (batch, max_nodes), device)?,
            pairs: Tensor::from_vec(pairs, (batch, max_nodes, max_nodes), device)?,
            human_counts: human_counts.to_vec(),
            object_counts: object_counts.to_vec(),
            max_nodes,
        })
    }

    /// Node validity `[B, N]`.
    pub fn nodes(&self) -> &Tensor {
        &self.nodes
    }

    /// Pair validity `[B, N, N]`, diagonal excluded.
    pub fn pairs(&self) -> &Tensor {
        &self.pairs
    }

    pub fn human_counts(&self) -> &[usize] {
        &self.human_counts
    }

    pub fn object_counts(&self) -> &[usize] {
        &self.object_counts
    }

    pub fn batch_size(&self) -> usize {
        self.human_counts.len()
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Number of valid nodes in sample `b`.
    pub fn valid_nodes(&self, b: usize) -> usize {
        self.human_counts[b] + self.object_counts[b]
    }

    /// Zero padded rows of a `[B, N, D]` tensor.
    pub fn apply_nodes(&self, x: &Tensor) -> Result<Tensor> {
        Ok(x.broadcast_mul(&self.nodes.unsqueeze(2)?)?)
    }

    /// Zero invalid and self pairs of a `[B, N, N]` tensor.
    pub fn apply_pairs(&self, x: &Tensor) -> Result<Tensor> {
        Ok(x.broadcast_mul(&self.pairs)?)
    }
}
