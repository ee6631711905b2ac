//! Evaluation metrics.
//!
//! # Mean Average Precision
//!
//! Every detection `(b, i, j)` contributes two rows to the evaluation set:
//! node `i`'s true labels and predicted scores, and node `j`'s. After a full
//! pass, average precision is computed per action class and averaged.
//!
//! | Quantity | Definition |
//! |----------|------------|
//! | P_k | precision when thresholding at the k-th distinct score |
//! | R_k | recall at the same threshold |
//! | AP | Σ_k (R_k - R_{k-1}) · P_k, with R_0 = 0 |
//! | mAP | Σ_c AP_c / C, classes without positives contribute 0 |
//!
//! Degenerate inputs (no rows, no positives) give 0 rather than an error.

use candle_core::Tensor;
use surgraph_core::{Error, Result};

use crate::detection::{stable_sigmoid, Detection};

/// Running value, sum, count and average.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AverageMeter {
    pub val: f64,
    pub sum: f64,
    pub count: usize,
    pub avg: f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record `val` observed `n` times.
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f64;
        }
    }
}

/// Average precision of one class. `None` when there are no positives.
pub fn average_precision(y_true: &[f32], y_score: &[f32]) -> Option<f64> {
    let total_positive = y_true.iter().filter(|&&y| y > 0.5).count();
    if total_positive == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..y_score.len()).collect();
    order.sort_by(|&a, &b| y_score[b].total_cmp(&y_score[a]));

    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut prev_recall = 0.0;
    let mut k = 0;
    while k < order.len() {
        // Tied scores form one threshold.
        let score = y_score[order[k]];
        while k < order.len() && y_score[order[k]] == score {
            if y_true[order[k]] > 0.5 {
                tp += 1;
            }
            seen += 1;
            k += 1;
        }
        let precision = tp as f64 / seen as f64;
        let recall = tp as f64 / total_positive as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Some(ap)
}

/// Mean of per-class AP over row-major `[rows, classes]` matrices.
pub fn mean_average_precision(y_true: &[Vec<f32>], y_score: &[Vec<f32>], classes: usize) -> f64 {
    if y_true.is_empty() || classes == 0 || y_true.len() != y_score.len() {
        return 0.0;
    }
    let total: f64 = (0..classes)
        .filter_map(|c| {
            let truth: Vec<f32> = y_true.iter().map(|row| row[c]).collect();
            let score: Vec<f32> = y_score.iter().map(|row| row[c]).collect();
            average_precision(&truth, &score)
        })
        .filter(|ap| ap.is_finite())
        .sum();
    total / classes as f64
}

/// Accumulates detection rows across an evaluation pass.
#[derive(Debug, Clone)]
pub struct MapAccumulator {
    classes: usize,
    y_true: Vec<Vec<f32>>,
    y_score: Vec<Vec<f32>>,
}

impl MapAccumulator {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            y_true: Vec::new(),
            y_score: Vec::new(),
        }
    }

    /// Add two rows per detection from logits and labels `[B, N, C]`.
    pub fn add_detections(
        &mut self,
        detections: &[Detection],
        node_logits: &Tensor,
        node_labels: &Tensor,
    ) -> Result<()> {
        if detections.is_empty() {
            return Ok(());
        }
        let logits = node_logits.to_vec3::<f32>()?;
        let labels = node_labels.to_vec3::<f32>()?;
        if let Some(row) = labels.first().and_then(|s| s.first()) {
            if row.len() != self.classes {
                return Err(Error::DimensionMismatch {
                    what: "action_classes",
                    expected: self.classes,
                    got: row.len(),
                });
            }
        }

        for det in detections {
            for node in [det.source, det.target] {
                self.y_true.push(labels[det.batch][node].clone());
                self.y_score.push(
                    logits[det.batch][node]
                        .iter()
                        .map(|&x| stable_sigmoid(x))
                        .collect(),
                );
            }
        }
        Ok(())
    }

    /// Rows accumulated so far (two per detection).
    pub fn rows(&self) -> usize {
        self.y_true.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_true.is_empty()
    }

    pub fn mean_average_precision(&self) -> f64 {
        mean_average_precision(&self.y_true, &self.y_score, self.classes)
    }

    pub fn reset(&mut self) {
        self.y_true.clear();
        self.y_score.clear();
    }
}
