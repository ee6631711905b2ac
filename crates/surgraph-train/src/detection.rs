//! Detection extraction.
//!
//! A detection is an ordered pair whose predicted link probability exceeds
//! the decision threshold and which goes from a human node to an object
//! node. Other pairs are scored by the network but never reported.

use candle_core::Tensor;
use surgraph_core::{is_valid_interaction, Error, Result};

/// Default decision threshold on link probabilities.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// One detected human→object interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Detection {
    /// Sample index within the batch.
    pub batch: usize,
    /// Human node index.
    pub source: usize,
    /// Object node index.
    pub target: usize,
}

/// Logistic function that never overflows.
///
/// `exp` is only evaluated on non-positive arguments.
pub fn stable_sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Detections in one sample's `[N, N]` probability matrix.
pub fn detections_in(
    probabilities: &[Vec<f32>],
    batch: usize,
    humans: usize,
    objects: usize,
    threshold: f32,
) -> Vec<Detection> {
    let mut out = Vec::new();
    for (source, row) in probabilities.iter().enumerate().take(humans) {
        for (target, &p) in row.iter().enumerate() {
            if p > threshold && is_valid_interaction(source, target, humans, objects) {
                out.push(Detection {
                    batch,
                    source,
                    target,
                });
            }
        }
    }
    out
}

/// Detections across a batch of probabilities `[B, N, N]`.
pub fn extract_detections(
    probabilities: &Tensor,
    human_counts: &[usize],
    object_counts: &[usize],
    threshold: f32,
) -> Result<Vec<Detection>> {
    let matrices = probabilities.to_vec3::<f32>()?;
    if matrices.len() != human_counts.len() || human_counts.len() != object_counts.len() {
        return Err(Error::DimensionMismatch {
            what: "detection counts",
            expected: matrices.len(),
            got: human_counts.len().min(object_counts.len()),
        });
    }
    Ok(matrices
        .iter()
        .enumerate()
        .flat_map(|(b, m)| detections_in(m, b, human_counts[b], object_counts[b], threshold))
        .collect())
}
