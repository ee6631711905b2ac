//! Edge messages.
//!
//! ```text
//! m_ij = [relu(W_n [h_i || h_j]) || relu(W_e e_ij)] * gate_ij
//! ```
//!
//! The node half has `message_size / 2` channels, the edge half the rest.
//! `gate_ij` is the link probability, or the ground-truth adjacency while
//! teacher forcing. Self pairs and padded slots are zeroed through the mask,
//! so a message is non-zero only where the gate and the mask both are.
//!
//! Node `i` aggregates the messages on its row: `agg_i = sum_j m_ij`.

use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use surgraph_core::{Error, GpnnConfig, NodeMask, Result};

use crate::link::pair_inputs;

/// Gated message function.
pub struct MessageFunction {
    node: Linear,
    edge: Linear,
    message_size: usize,
}

impl MessageFunction {
    pub fn new(config: &GpnnConfig, vb: VarBuilder) -> Result<Self> {
        let node_part = config.message_size / 2;
        let edge_part = config.message_size - node_part;
        Ok(Self {
            node: linear(2 * config.hidden_size(), node_part, vb.pp("node"))?,
            edge: linear(config.edge_size(), edge_part, vb.pp("edge"))?,
            message_size: config.message_size,
        })
    }

    /// Messages `[B, N, N, M]` for hidden states `[B, N, D]`, edge features
    /// `[B, N, N, De]`, and gate `[B, N, N]`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        edge_features: &Tensor,
        gate: &Tensor,
        mask: &NodeMask,
    ) -> Result<Tensor> {
        let (b, n, _) = hidden.dims3()?;
        if gate.dims() != [b, n, n].as_slice() {
            return Err(Error::Shape {
                what: "message gate",
                expected: "[B, N, N]",
                got: gate.dims().to_vec(),
            });
        }

        let nodes = pair_inputs(hidden, None)?;
        let node_width = nodes.dim(3)?;
        let node_msg = self
            .node
            .forward(&nodes.reshape((b * n * n, node_width))?)?
            .relu()?;

        let edge_width = edge_features.dim(3)?;
        let edge_msg = self
            .edge
            .forward(&edge_features.contiguous()?.reshape((b * n * n, edge_width))?)?
            .relu()?;

        let messages =
            Tensor::cat(&[&node_msg, &edge_msg], 1)?.reshape((b, n, n, self.message_size))?;
        let gate = mask.apply_pairs(gate)?;
        Ok(messages.broadcast_mul(&gate.unsqueeze(3)?)?)
    }

    /// Sum each node's row of messages: `[B, N, N, M] -> [B, N, M]`.
    pub fn aggregate(messages: &Tensor) -> Result<Tensor> {
        Ok(messages.sum(2)?)
    }
}
