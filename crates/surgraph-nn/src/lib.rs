//! Graph parsing neural network (GPNN).
//!
//! GPNN parses a graph out of a set of nodes: it does not receive the edges,
//! it infers them. Each propagation round alternates two steps:
//!
//! ```text
//! A^{(r)}_ij   = sigmoid(LINK([h_i^{(r)}, h_j^{(r)}, e_ij]))
//! m^{(r)}_ij   = A^{(r)}_ij * MESSAGE(h_i^{(r)}, h_j^{(r)}, e_ij)
//! h_i^{(r+1)}  = UPDATE(h_i^{(r)}, sum_j m^{(r)}_ij)
//! y_i^{(r+1)}  = READOUT(h_i^{(r+1)})
//! ```
//!
//! The final round's adjacency `A` and node logits `y` are the prediction.
//!
//! ## Modules
//!
//! - [`link`]: Pairwise link scoring ([`LinkFunction`])
//! - [`message`]: Gated edge messages ([`MessageFunction`])
//! - [`update`]: GRU node update with readout ([`UpdateFunction`])
//! - [`model`]: The propagation controller ([`Gpnn`])
//!
//! ## Padding
//!
//! All tensors are padded to the batch's largest node count. Every module
//! takes the batch's [`surgraph_core::NodeMask`] and zeroes padded slots and
//! self pairs before anything is summed.
//!
//! ## Reference
//!
//! Qi et al., "Learning Human-Object Interactions by Graph Parsing Neural
//! Networks", ECCV 2018.

pub mod link;
pub mod message;
pub mod model;
pub mod update;

pub use link::{LinkFunction, LinkPrediction};
pub use message::MessageFunction;
pub use model::{ForwardMode, Gpnn, PropagationOutput};
pub use update::{NodeUpdate, UpdateFunction};
