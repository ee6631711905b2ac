//! The propagation controller.
//!
//! # Rounds
//!
//! ```text
//! h^0 = node_features                 (optionally projected)
//! for r in 0..R:
//!     A^r  = LINK(h^r, e)
//!     g^r  = adjacency_gt   if training and r < teacher_forcing_rounds
//!            A^r            otherwise
//!     m^r  = MESSAGE(h^r, e, g^r)
//!     h^{r+1}, y^{r+1} = UPDATE(h^r, sum_j m^r_ij)
//! return A^{R-1}, y^R
//! ```
//!
//! Rounds are strictly sequential. All intermediate tensors belong to one
//! call of [`Gpnn::forward`]; gradients flow through candle's autograd when
//! the caller runs `backward` on a loss built from the output.
//!
//! # Validity
//!
//! Every pair is scored, but only human→object pairs count as detections
//! (see `surgraph_core::is_valid_interaction`). Padded slots and self pairs
//! are masked out of messages, aggregation and outputs.

use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use surgraph_core::{Error, GpnnConfig, GraphBatch, Result};
use tracing::trace;

use crate::link::LinkFunction;
use crate::message::MessageFunction;
use crate::update::UpdateFunction;

/// Training or evaluation behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Dropout on; ground-truth adjacency gates the leading rounds.
    Train,
    /// Dropout off; predicted adjacency gates every round.
    Eval,
}

impl ForwardMode {
    pub fn is_train(self) -> bool {
        self == ForwardMode::Train
    }
}

/// Final-round outputs of a forward pass.
#[derive(Debug, Clone)]
pub struct PropagationOutput {
    /// Link logits `[B, N, N]`.
    pub adjacency_logits: Tensor,
    /// Link probabilities `[B, N, N]` in `[0, 1]`, zero on self pairs and padding.
    pub adjacency: Tensor,
    /// Action logits `[B, N, C]`, zero on padding.
    pub node_logits: Tensor,
    /// Gated messages of the last round `[B, N, N, M]`.
    pub messages: Tensor,
}

/// Graph parsing neural network.
pub struct Gpnn {
    config: GpnnConfig,
    node_resize: Option<Linear>,
    edge_resize: Option<Linear>,
    link: LinkFunction,
    message: MessageFunction,
    update: UpdateFunction,
}

impl Gpnn {
    /// Create a network. Parameters are registered under `link.`,
    /// `message.`, `update.` (and `resize.` when projecting features).
    pub fn new(config: GpnnConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let (node_resize, edge_resize) = if config.resize_feature_to_message_size {
            (
                Some(linear(
                    config.node_feature_size,
                    config.message_size,
                    vb.pp("resize.node"),
                )?),
                Some(linear(
                    config.edge_feature_size,
                    config.message_size,
                    vb.pp("resize.edge"),
                )?),
            )
        } else {
            (None, None)
        };

        let link = LinkFunction::new(&config, vb.pp("link"))?;
        let message = MessageFunction::new(&config, vb.pp("message"))?;
        let update = UpdateFunction::new(&config, vb.pp("update"))?;

        Ok(Self {
            config,
            node_resize,
            edge_resize,
            link,
            message,
            update,
        })
    }

    pub fn config(&self) -> &GpnnConfig {
        &self.config
    }

    /// Run `propagate_layers` rounds over a batch.
    ///
    /// Fails with a shape error if the batch does not match the
    /// configuration; nothing is truncated or re-padded here.
    pub fn forward(&self, batch: &GraphBatch, mode: ForwardMode) -> Result<PropagationOutput> {
        batch.validate(&self.config)?;
        let mask = batch.mask()?;

        let mut hidden = match &self.node_resize {
            Some(layer) => layer.forward(&batch.node_features)?,
            None => batch.node_features.clone(),
        };
        hidden = mask.apply_nodes(&hidden)?;
        let edges = match &self.edge_resize {
            Some(layer) => layer.forward(&batch.edge_features)?,
            None => batch.edge_features.clone(),
        };

        let mut output = None;
        for round in 0..self.config.propagate_layers {
            let link = self.link.forward(&hidden, &edges, &mask)?;
            let forced = mode.is_train() && round < self.config.teacher_forcing_rounds;
            let gate = if forced {
                &batch.adjacency
            } else {
                &link.probabilities
            };

            let messages = self.message.forward(&hidden, &edges, gate, &mask)?;
            let aggregated = MessageFunction::aggregate(&messages)?;
            let update = self.update.forward(&hidden, &aggregated, &mask, mode.is_train())?;
            trace!(round, forced, "propagation round");

            hidden = update.hidden;
            output = Some(PropagationOutput {
                adjacency_logits: link.logits,
                adjacency: link.probabilities,
                node_logits: update.logits,
                messages,
            });
        }

        output.ok_or_else(|| Error::InvalidConfig("propagate_layers must be positive".into()))
    }
}
