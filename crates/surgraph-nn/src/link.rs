//! Link inference: score every ordered node pair.
//!
//! For each pair `(i, j)` the MLP sees `[h_i || h_j || e_ij]` and emits one
//! logit. Probabilities go through `candle_nn::ops::sigmoid`, which saturates
//! to exactly 0 or 1 for huge logits instead of producing `inf / inf`.

use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use surgraph_core::{Error, GpnnConfig, NodeMask, Result};

/// Output of one link inference step.
#[derive(Debug, Clone)]
pub struct LinkPrediction {
    /// Raw pair scores `[B, N, N]`.
    pub logits: Tensor,
    /// Edge probabilities `[B, N, N]`, zero on self pairs and padding.
    pub probabilities: Tensor,
}

/// Pairwise link scoring MLP.
pub struct LinkFunction {
    layers: Vec<Linear>,
    relu: bool,
}

impl LinkFunction {
    /// Create the link MLP.
    ///
    /// Input width is `2 * hidden_size + edge_size`; `link_hidden_layers`
    /// layers of `link_hidden_size` precede the scalar output layer.
    pub fn new(config: &GpnnConfig, vb: VarBuilder) -> Result<Self> {
        let mut width = 2 * config.hidden_size() + config.edge_size();
        let mut layers = Vec::with_capacity(config.link_hidden_layers + 1);
        for l in 0..config.link_hidden_layers {
            layers.push(linear(width, config.link_hidden_size, vb.pp(format!("hidden{l}")))?);
            width = config.link_hidden_size;
        }
        layers.push(linear(width, 1, vb.pp("out"))?);
        Ok(Self {
            layers,
            relu: config.link_relu,
        })
    }

    /// Raw logits `[B, N, N]` for hidden states `[B, N, D]` and edge
    /// features `[B, N, N, De]`.
    pub fn logits(&self, hidden: &Tensor, edge_features: &Tensor) -> Result<Tensor> {
        let (b, n, _) = hidden.dims3()?;
        let pairs = pair_inputs(hidden, Some(edge_features))?;
        let width = pairs.dim(3)?;

        let mut x = pairs.reshape((b * n * n, width))?;
        let last = self.layers.len() - 1;
        for (idx, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if self.relu && idx < last {
                x = x.relu()?;
            }
        }
        Ok(x.reshape((b, n, n))?)
    }

    /// Logits and masked probabilities.
    pub fn forward(
        &self,
        hidden: &Tensor,
        edge_features: &Tensor,
        mask: &NodeMask,
    ) -> Result<LinkPrediction> {
        let logits = self.logits(hidden, edge_features)?;
        let probabilities = mask.apply_pairs(&candle_nn::ops::sigmoid(&logits)?)?;
        Ok(LinkPrediction {
            logits,
            probabilities,
        })
    }
}

/// Build `[h_i || h_j (|| e_ij)]` for every ordered pair: `[B, N, N, ...]`.
pub(crate) fn pair_inputs(hidden: &Tensor, edge_features: Option<&Tensor>) -> Result<Tensor> {
    let (b, n, d) = hidden.dims3()?;
    let source = hidden.unsqueeze(2)?.broadcast_as((b, n, n, d))?.contiguous()?;
    let target = hidden.unsqueeze(1)?.broadcast_as((b, n, n, d))?.contiguous()?;
    match edge_features {
        Some(edges) => {
            let (eb, en, em, _) = edges.dims4()?;
            if (eb, en, em) != (b, n, n) {
                return Err(Error::Shape {
                    what: "edge_features",
                    expected: "[B, N, N, De] matching node states",
                    got: edges.dims().to_vec(),
                });
            }
            Ok(Tensor::cat(&[&source, &target, &edges.contiguous()?], 3)?)
        }
        None => Ok(Tensor::cat(&[&source, &target], 3)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config() -> GpnnConfig {
        GpnnConfig::default()
            .with_feature_sizes(6, 4)
            .with_message_size(8)
            .with_link_hidden(16, 2)
    }

    #[test]
    fn test_pair_inputs_layout() {
        let device = Device::Cpu;
        // h_0 = [0, 0], h_1 = [1, 1]
        let hidden = Tensor::new(&[[[0f32, 0.], [1., 1.]]], &device).unwrap();
        let pairs = pair_inputs(&hidden, None).unwrap();
        assert_eq!(pairs.dims(), &[1, 2, 2, 4]);
        let p = pairs
            .squeeze(0)
            .unwrap()
            .to_vec3::<f32>()
            .unwrap();
        // (0 -> 1): source h_0, target h_1
        assert_eq!(p[0][1], vec![0.0, 0.0, 1.0, 1.0]);
        // (1 -> 0): source h_1, target h_0
        assert_eq!(p[1][0], vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_link_forward_shape_and_mask() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let link = LinkFunction::new(&config(), vb).unwrap();

        let hidden = Tensor::randn(0f32, 1f32, (2, 3, 6), &device).unwrap();
        let edges = Tensor::randn(0f32, 1f32, (2, 3, 3, 4), &device).unwrap();
        let mask = NodeMask::new(&[1, 2], &[1, 1], 3, &device).unwrap();

        let pred = link.forward(&hidden, &edges, &mask).unwrap();
        assert_eq!(pred.logits.dims(), &[2, 3, 3]);

        let probs = pred.probabilities.to_vec3::<f32>().unwrap();
        for (b, sample) in probs.iter().enumerate() {
            for (i, row) in sample.iter().enumerate() {
                for (j, &p) in row.iter().enumerate() {
                    assert!((0.0..=1.0).contains(&p));
                    let valid = mask.valid_nodes(b);
                    if i == j || i >= valid || j >= valid {
                        assert_eq!(p, 0.0, "pair ({i}, {j}) of sample {b} should be masked");
                    }
                }
            }
        }
    }

    #[test]
    fn test_edge_shape_mismatch_is_error() {
        let device = Device::Cpu;
        let hidden = Tensor::zeros((1, 3, 6), DType::F32, &device).unwrap();
        let edges = Tensor::zeros((1, 2, 2, 4), DType::F32, &device).unwrap();
        assert!(matches!(
            pair_inputs(&hidden, Some(&edges)),
            Err(Error::Shape { what: "edge_features", .. })
        ));
    }
}
