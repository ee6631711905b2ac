//! Model configuration.
//!
//! [`GpnnConfig`] is passed explicitly to every component that needs it.
//! There is no process-wide settings object.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ontology::ACTION_CLASSES;

/// Graph parsing network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpnnConfig {
    /// Edge feature dimension (default: 200).
    pub edge_feature_size: usize,
    /// Node feature dimension (default: 200).
    pub node_feature_size: usize,
    /// Message dimension (default: 200).
    pub message_size: usize,
    /// Number of action classes per node (default: 13).
    pub action_classes: usize,
    /// Propagation rounds R (default: 3).
    pub propagate_layers: usize,
    /// Width of the link MLP hidden layers (default: 512).
    pub link_hidden_size: usize,
    /// Number of link MLP hidden layers (default: 2).
    pub link_hidden_layers: usize,
    /// ReLU between link MLP layers (default: false).
    pub link_relu: bool,
    /// Stacked GRU cells in the node update (default: 1).
    pub update_hidden_layers: usize,
    /// Dropout probability on aggregated messages, training only (default: None).
    pub update_dropout: Option<f32>,
    /// Bias terms in the node update (default: true).
    pub update_bias: bool,
    /// Project node and edge features to `message_size` before propagation (default: false).
    pub resize_feature_to_message_size: bool,
    /// Leading rounds gated by ground-truth adjacency in training mode (default: 1).
    pub teacher_forcing_rounds: usize,
}

impl Default for GpnnConfig {
    fn default() -> Self {
        Self {
            edge_feature_size: 200,
            node_feature_size: 200,
            message_size: 200,
            action_classes: ACTION_CLASSES.len(),
            propagate_layers: 3,
            link_hidden_size: 512,
            link_hidden_layers: 2,
            link_relu: false,
            update_hidden_layers: 1,
            update_dropout: None,
            update_bias: true,
            resize_feature_to_message_size: false,
            teacher_forcing_rounds: 1,
        }
    }
}

impl GpnnConfig {
    pub fn with_feature_sizes(mut self, node: usize, edge: usize) -> Self {
        self.node_feature_size = node;
        self.edge_feature_size = edge;
        self
    }

    pub fn with_message_size(mut self, size: usize) -> Self {
        self.message_size = size;
        self
    }

    pub fn with_action_classes(mut self, classes: usize) -> Self {
        self.action_classes = classes;
        self
    }

    pub fn with_propagate_layers(mut self, rounds: usize) -> Self {
        self.propagate_layers = rounds;
        self
    }

    pub fn with_link_hidden(mut self, size: usize, layers: usize) -> Self {
        self.link_hidden_size = size;
        self.link_hidden_layers = layers;
        self
    }

    pub fn with_update_dropout(mut self, p: Option<f32>) -> Self {
        self.update_dropout = p;
        self
    }

    pub fn with_teacher_forcing_rounds(mut self, rounds: usize) -> Self {
        self.teacher_forcing_rounds = rounds;
        self
    }

    /// Width of node hidden states during propagation.
    pub fn hidden_size(&self) -> usize {
        if self.resize_feature_to_message_size {
            self.message_size
        } else {
            self.node_feature_size
        }
    }

    /// Width of edge features seen by the link and message functions.
    pub fn edge_size(&self) -> usize {
        if self.resize_feature_to_message_size {
            self.message_size
        } else {
            self.edge_feature_size
        }
    }

    /// Check that the configuration describes a buildable network.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("edge_feature_size", self.edge_feature_size),
            ("node_feature_size", self.node_feature_size),
            ("action_classes", self.action_classes),
            ("propagate_layers", self.propagate_layers),
            ("update_hidden_layers", self.update_hidden_layers),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.message_size < 2 {
            return Err(Error::InvalidConfig(
                "message_size must be at least 2 (node and edge halves)".into(),
            ));
        }
        if self.link_hidden_layers > 0 && self.link_hidden_size == 0 {
            return Err(Error::InvalidConfig(
                "link_hidden_size must be positive when link_hidden_layers > 0".into(),
            ));
        }
        if let Some(p) = self.update_dropout {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!(
                    "update_dropout must be in [0, 1), got {p}"
                )));
            }
        }
        Ok(())
    }
}
