//! Weighted multi-label soft-margin loss.
//!
//! Most (node, action) pairs are negative, so positives are up-weighted:
//!
//! ```text
//! w_kc    = 1 + y_kc * link_weight
//! l_b     = -1/(n_b * C) * sum_{k < n_b} sum_c w_kc * (y_kc * log σ(x_kc) + (1 - y_kc) * log σ(-x_kc))
//! loss    = sum_b l_b            (LossReduction::Sum)
//!         = mean_b l_b           (LossReduction::Mean)
//! ```
//!
//! `n_b` is the number of valid nodes of sample `b`; padded slots are masked
//! out before summation.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use surgraph_core::{NodeMask, Result};

/// How per-sample losses combine across a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossReduction {
    /// Sum over samples. Loss grows with batch size.
    #[default]
    Sum,
    /// Mean over samples.
    Mean,
}

/// `log σ(x)` without overflow: `-(relu(-x) + log(1 + exp(-|x|)))`.
pub fn log_sigmoid(x: &Tensor) -> Result<Tensor> {
    let softplus = (x.neg()?.relu()? + x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?)?;
    Ok(softplus.neg()?)
}

/// Weighted multi-label loss over valid nodes.
///
/// `logits` and `labels` are `[B, N, C]`; returns a scalar tensor that
/// carries gradients back to `logits`.
pub fn weighted_multilabel_loss(
    logits: &Tensor,
    labels: &Tensor,
    mask: &NodeMask,
    link_weight: f64,
    reduction: LossReduction,
) -> Result<Tensor> {
    let (b, _, c) = logits.dims3()?;

    let weight = labels.affine(link_weight, 1.0)?;
    let positive = (labels * log_sigmoid(logits)?)?;
    let negative = (labels.affine(-1.0, 1.0)? * log_sigmoid(&logits.neg()?)?)?;
    let elementwise = (weight * (positive + negative)?)?.neg()?;

    let per_sample = mask.apply_nodes(&elementwise)?.sum(2)?.sum(1)?;
    let denominators: Vec<f32> = (0..b)
        .map(|i| (mask.valid_nodes(i).max(1) * c) as f32)
        .collect();
    let denominators = Tensor::from_vec(denominators, b, logits.device())?;
    let per_sample = per_sample.div(&denominators)?;

    let loss = match reduction {
        LossReduction::Sum => per_sample.sum_all()?,
        LossReduction::Mean => per_sample.mean_all()?,
    };
    Ok(loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_log_sigmoid_stable() {
        let x = Tensor::new(&[-1e4f32, -2.0, 0.0, 2.0, 1e4], &Device::Cpu).unwrap();
        let y = log_sigmoid(&x).unwrap().to_vec1::<f32>().unwrap();
        assert!((y[0] + 1e4).abs() < 1.0);
        assert!((y[1] - (-2.126_928)).abs() < 1e-4);
        assert!((y[2] - (-std::f32::consts::LN_2)).abs() < 1e-6);
        assert!((y[3] - (-0.126_928)).abs() < 1e-4);
        assert_eq!(y[4], 0.0);
        assert!(y.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_known_value() {
        // One valid node, two classes, zero logits, label [1, 0].
        // Each element costs ln 2 times its weight: (1 + w) and 1.
        let device = Device::Cpu;
        let logits = Tensor::zeros((1, 2, 2), DType::F32, &device).unwrap();
        let labels = Tensor::new(&[[[1f32, 0.], [1., 1.]]], &device).unwrap();
        // Second slot is padding and must be ignored.
        let mask = NodeMask::new(&[1], &[0], 2, &device).unwrap();

        let loss = weighted_multilabel_loss(&logits, &labels, &mask, 100.0, LossReduction::Sum).unwrap();
        let expected = (101.0 + 1.0) / 2.0 * std::f32::consts::LN_2;
        assert!((scalar(&loss) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_sum_versus_mean() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[[0.5f32, -1.0]], [[2.0, 0.0]]], &device).unwrap();
        let labels = Tensor::new(&[[[1f32, 0.]], [[0., 1.]]], &device).unwrap();
        let mask = NodeMask::new(&[1, 1], &[0, 0], 1, &device).unwrap();

        let sum = weighted_multilabel_loss(&logits, &labels, &mask, 10.0, LossReduction::Sum).unwrap();
        let mean = weighted_multilabel_loss(&logits, &labels, &mask, 10.0, LossReduction::Mean).unwrap();
        assert!((scalar(&sum) - 2.0 * scalar(&mean)).abs() < 1e-4);
    }

    #[test]
    fn test_empty_sample_contributes_nothing() {
        let device = Device::Cpu;
        let logits = Tensor::ones((2, 2, 3), DType::F32, &device).unwrap();
        let labels = Tensor::ones((2, 2, 3), DType::F32, &device).unwrap();
        let full = NodeMask::new(&[1, 0], &[1, 0], 2, &device).unwrap();
        let single = NodeMask::new(&[1], &[1], 2, &device).unwrap();

        let both = weighted_multilabel_loss(&logits, &labels, &full, 1.0, LossReduction::Sum).unwrap();
        let one = weighted_multilabel_loss(
            &logits.narrow(0, 0, 1).unwrap(),
            &labels.narrow(0, 0, 1).unwrap(),
            &single,
            1.0,
            LossReduction::Sum,
        )
        .unwrap();
        assert!((scalar(&both) - scalar(&one)).abs() < 1e-6);
    }

    #[test]
    fn test_loss_has_gradient() {
        let device = Device::Cpu;
        let var = candle_core::Var::zeros((1, 2, 2), DType::F32, &device).unwrap();
        let labels = Tensor::new(&[[[1f32, 0.], [0., 1.]]], &device).unwrap();
        let mask = NodeMask::new(&[1], &[1], 2, &device).unwrap();
        let loss = weighted_multilabel_loss(var.as_tensor(), &labels, &mask, 1.0, LossReduction::Sum).unwrap();
        let grads = loss.backward().unwrap();
        let g = grads.get(var.as_tensor()).unwrap().to_vec3::<f32>().unwrap();
        // Positive labels push logits up (negative gradient), negatives down.
        assert!(g[0][0][0] < 0.0);
        assert!(g[0][0][1] > 0.0);
    }
}
