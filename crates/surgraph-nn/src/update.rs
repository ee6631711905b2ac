//! Node update and per-round readout.
//!
//! Each node's hidden state is updated by a GRU cell whose input is the
//! node's aggregated message (the GGNN row of the MPNN family):
//!
//! ```text
//! r  = sigmoid(W_ir x + W_hr h)
//! z  = sigmoid(W_iz x + W_hz h)
//! n  = tanh(W_in x + r * (W_hn h))
//! h' = (1 - z) * n + z * h
//! ```
//!
//! A linear readout maps `h'` to action logits. Padded node slots are zeroed
//! after the update.

use candle_core::{Module, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};
use surgraph_core::{GpnnConfig, NodeMask, Result};

/// Output of one node update.
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    /// Next hidden states `[B, N, D]`.
    pub hidden: Tensor,
    /// Action logits `[B, N, C]` for this round.
    pub logits: Tensor,
}

struct GruCell {
    input: Linear,
    hidden: Linear,
}

impl GruCell {
    fn new(input_size: usize, hidden_size: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            input: gate_layer(input_size, 3 * hidden_size, bias, vb.pp("ih"))?,
            hidden: gate_layer(hidden_size, 3 * hidden_size, bias, vb.pp("hh"))?,
        })
    }

    /// `x: [K, input]`, `h: [K, hidden]` -> `[K, hidden]`.
    fn step(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let gi = self.input.forward(x)?.chunk(3, 1)?;
        let gh = self.hidden.forward(h)?.chunk(3, 1)?;

        let r = candle_nn::ops::sigmoid(&(&gi[0] + &gh[0])?)?;
        let z = candle_nn::ops::sigmoid(&(&gi[1] + &gh[1])?)?;
        let n = (&gi[2] + (&r * &gh[2])?)?.tanh()?;

        let keep = (&z * h)?;
        let fresh = (z.affine(-1.0, 1.0)? * n)?;
        Ok((fresh + keep)?)
    }
}

fn gate_layer(input: usize, output: usize, bias: bool, vb: VarBuilder) -> Result<Linear> {
    let layer = if bias {
        linear(input, output, vb)?
    } else {
        linear_no_bias(input, output, vb)?
    };
    Ok(layer)
}

/// GRU update followed by a linear action readout.
pub struct UpdateFunction {
    cells: Vec<GruCell>,
    readout: Linear,
    dropout: Option<f32>,
}

impl UpdateFunction {
    pub fn new(config: &GpnnConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size();
        let mut cells = Vec::with_capacity(config.update_hidden_layers);
        for l in 0..config.update_hidden_layers {
            let input = if l == 0 { config.message_size } else { hidden };
            cells.push(GruCell::new(input, hidden, config.update_bias, vb.pp(format!("gru{l}")))?);
        }
        let readout = linear(hidden, config.action_classes, vb.pp("readout"))?;
        Ok(Self {
            cells,
            readout,
            dropout: config.update_dropout.filter(|p| *p > 0.0),
        })
    }

    /// Update hidden states `[B, N, D]` from aggregated messages `[B, N, M]`.
    ///
    /// Dropout on the messages is applied only when `train` is set.
    pub fn forward(
        &self,
        hidden: &Tensor,
        messages: &Tensor,
        mask: &NodeMask,
        train: bool,
    ) -> Result<NodeUpdate> {
        let (b, n, d) = hidden.dims3()?;
        let m = messages.dim(2)?;

        let mut x = messages.reshape((b * n, m))?;
        if let (true, Some(p)) = (train, self.dropout) {
            x = candle_nn::ops::dropout(&x, p)?;
        }

        let h = hidden.reshape((b * n, d))?;
        for cell in &self.cells {
            x = cell.step(&x, &h)?;
        }

        let next = mask.apply_nodes(&x.reshape((b, n, d))?)?;
        let logits = mask.apply_nodes(&self.readout.forward(&next)?)?;
        Ok(NodeUpdate {
            hidden: next,
            logits,
        })
    }
}
