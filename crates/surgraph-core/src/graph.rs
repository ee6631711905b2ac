//! Graph samples and padded batches.
//!
//! A [`GraphSample`] is one video frame: `human_count` instrument nodes
//! followed by `object_count` context nodes, optionally padded to a fixed
//! node count. A [`GraphBatch`] stacks samples on the largest node count in
//! the batch, zero-padding the rest.
//!
//! ```text
//! edge_features  [N, N, De]   indexed [source, target, feature]
//! node_features  [N, Dn]
//! adjacency      [N, N]       ground truth, 0/1
//! node_labels    [N, C]       multi-label, 0/1
//! ```

use candle_core::{Device, Tensor};

use crate::config::GpnnConfig;
use crate::error::{Error, Result};
use crate::mask::NodeMask;

/// One training or validation graph.
#[derive(Debug, Clone)]
pub struct GraphSample {
    /// Source frame reference.
    pub identifier: String,
    pub edge_features: Tensor,
    pub node_features: Tensor,
    pub adjacency: Tensor,
    pub node_labels: Tensor,
    pub human_count: usize,
    pub object_count: usize,
}

impl GraphSample {
    /// Build a sample, checking every tensor against the node count of
    /// `node_features`.
    pub fn new(
        identifier: impl Into<String>,
        edge_features: Tensor,
        node_features: Tensor,
        adjacency: Tensor,
        node_labels: Tensor,
        human_count: usize,
        object_count: usize,
    ) -> Result<Self> {
        let identifier = identifier.into();
        let (n, _) = rank2(&node_features, "node_features", "[N, node_feature_size]")?;

        let (e0, e1, _) = rank3(&edge_features, "edge_features", "[N, N, edge_feature_size]")?;
        expect_dim("edge_features source", n, e0)?;
        expect_dim("edge_features target", n, e1)?;

        let (a0, a1) = rank2(&adjacency, "adjacency", "[N, N]")?;
        expect_dim("adjacency rows", n, a0)?;
        expect_dim("adjacency columns", n, a1)?;

        let (l0, _) = rank2(&node_labels, "node_labels", "[N, action_classes]")?;
        expect_dim("node_labels rows", n, l0)?;

        if exceeds(human_count, object_count, n) {
            return Err(Error::NodeCount {
                identifier,
                humans: human_count,
                objects: object_count,
                max_nodes: n,
            });
        }

        Ok(Self {
            identifier,
            edge_features,
            node_features,
            adjacency,
            node_labels,
            human_count,
            object_count,
        })
    }

    /// Node slots including padding.
    pub fn num_nodes(&self) -> usize {
        self.node_features.dims()[0]
    }

    pub fn node_feature_size(&self) -> usize {
        self.node_features.dims()[1]
    }

    pub fn edge_feature_size(&self) -> usize {
        self.edge_features.dims()[2]
    }

    pub fn action_classes(&self) -> usize {
        self.node_labels.dims()[1]
    }
}

/// Samples stacked on a common padded node dimension.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    /// `[B, N, N, De]`
    pub edge_features: Tensor,
    /// `[B, N, Dn]`
    pub node_features: Tensor,
    /// `[B, N, N]`
    pub adjacency: Tensor,
    /// `[B, N, C]`
    pub node_labels: Tensor,
    pub human_counts: Vec<usize>,
    pub object_counts: Vec<usize>,
    pub identifiers: Vec<String>,
}

impl GraphBatch {
    /// Pad samples to the largest node count among them and stack.
    pub fn collate(samples: &[GraphSample], device: &Device) -> Result<Self> {
        let first = samples.first().ok_or(Error::EmptyBatch)?;
        let max_nodes = samples.iter().map(GraphSample::num_nodes).max().unwrap_or(0);

        let mut edges = Vec::with_capacity(samples.len());
        let mut nodes = Vec::with_capacity(samples.len());
        let mut adjacency = Vec::with_capacity(samples.len());
        let mut labels = Vec::with_capacity(samples.len());

        for sample in samples {
            expect_dim(
                "node_feature_size",
                first.node_feature_size(),
                sample.node_feature_size(),
            )?;
            expect_dim(
                "edge_feature_size",
                first.edge_feature_size(),
                sample.edge_feature_size(),
            )?;
            expect_dim("action_classes", first.action_classes(), sample.action_classes())?;

            let pad = max_nodes - sample.num_nodes();
            edges.push(
                sample
                    .edge_features
                    .pad_with_zeros(0, 0, pad)?
                    .pad_with_zeros(1, 0, pad)?
                    .to_device(device)?,
            );
            nodes.push(sample.node_features.pad_with_zeros(0, 0, pad)?.to_device(device)?);
            adjacency.push(
                sample
                    .adjacency
                    .pad_with_zeros(0, 0, pad)?
                    .pad_with_zeros(1, 0, pad)?
                    .to_device(device)?,
            );
            labels.push(sample.node_labels.pad_with_zeros(0, 0, pad)?.to_device(device)?);
        }

        Ok(Self {
            edge_features: Tensor::stack(&edges, 0)?,
            node_features: Tensor::stack(&nodes, 0)?,
            adjacency: Tensor::stack(&adjacency, 0)?,
            node_labels: Tensor::stack(&labels, 0)?,
            human_counts: samples.iter().map(|s| s.human_count).collect(),
            object_counts: samples.iter().map(|s| s.object_count).collect(),
            identifiers: samples.iter().map(|s| s.identifier.clone()).collect(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.human_counts.len()
    }

    /// Padded node dimension `N`.
    pub fn max_nodes(&self) -> usize {
        self.node_features.dims()[1]
    }

    pub fn device(&self) -> &Device {
        self.node_features.device()
    }

    /// Validity masks for this batch.
    pub fn mask(&self) -> Result<NodeMask> {
        NodeMask::new(
            &self.human_counts,
            &self.object_counts,
            self.max_nodes(),
            self.device(),
        )
    }

    /// Check tensor shapes against each other and against `config`.
    pub fn validate(&self, config: &GpnnConfig) -> Result<()> {
        let (b, n, dn) = rank3(&self.node_features, "node_features", "[B, N, node_feature_size]")?;
        expect_dim("node_feature_size", config.node_feature_size, dn)?;
        expect_dim("human_counts", b, self.human_counts.len())?;
        expect_dim("object_counts", b, self.object_counts.len())?;

        let dims = self.edge_features.dims();
        if dims.len() != 4 {
            return Err(Error::Shape {
                what: "edge_features",
                expected: "[B, N, N, edge_feature_size]",
                got: dims.to_vec(),
            });
        }
        expect_dim("edge_features batch", b, dims[0])?;
        expect_dim("edge_features source", n, dims[1])?;
        expect_dim("edge_features target", n, dims[2])?;
        expect_dim("edge_feature_size", config.edge_feature_size, dims[3])?;

        let (ab, an, am) = rank3(&self.adjacency, "adjacency", "[B, N, N]")?;
        expect_dim("adjacency batch", b, ab)?;
        expect_dim("adjacency rows", n, an)?;
        expect_dim("adjacency columns", n, am)?;

        let (lb, ln, lc) = rank3(&self.node_labels, "node_labels", "[B, N, action_classes]")?;
        expect_dim("node_labels batch", b, lb)?;
        expect_dim("node_labels rows", n, ln)?;
        expect_dim("action_classes", config.action_classes, lc)?;

        for (idx, (&h, &o)) in self.human_counts.iter().zip(&self.object_counts).enumerate() {
            if exceeds(h, o, n) {
                return Err(Error::NodeCount {
                    identifier: self
                        .identifiers
                        .get(idx)
                        .cloned()
                        .unwrap_or_else(|| format!("batch index {idx}")),
                    humans: h,
                    objects: o,
                    max_nodes: n,
                });
            }
        }
        Ok(())
    }
}

fn expect_dim(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { what, expected, got })
    }
}

fn rank2(t: &Tensor, what: &'static str, expected: &'static str) -> Result<(usize, usize)> {
    t.dims2().map_err(|_| Error::Shape {
        what,
        expected,
        got: t.dims().to_vec(),
    })
}

fn rank3(
    t: &Tensor,
    what: &'static str,
    expected: &'static str,
) -> Result<(usize, usize, usize)> {
    t.dims3().map_err(|_| Error::Shape {
        what,
        expected,
        got: t.dims().to_vec(),
    })
}

/// True when `humans + objects` does not fit in `n` slots, overflow included.
fn exceeds(humans: usize, objects: usize, n: usize) -> bool {
    humans.checked_add(objects).map_or(true, |valid| valid > n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn sample(n: usize, humans: usize, objects: usize) -> GraphSample {
        let device = Device::Cpu;
        GraphSample::new(
            format!("frame_{n}"),
            Tensor::ones((n, n, 4), DType::F32, &device).unwrap(),
            Tensor::ones((n, 3), DType::F32, &device).unwrap(),
            Tensor::zeros((n, n), DType::F32, &device).unwrap(),
            Tensor::zeros((n, 2), DType::F32, &device).unwrap(),
            humans,
            objects,
        )
        .unwrap()
    }

    #[test]
    fn test_sample_rejects_mismatched_edges() {
        let device = Device::Cpu;
        let err = GraphSample::new(
            "bad",
            Tensor::zeros((3, 2, 4), DType::F32, &device).unwrap(),
            Tensor::zeros((3, 3), DType::F32, &device).unwrap(),
            Tensor::zeros((3, 3), DType::F32, &device).unwrap(),
            Tensor::zeros((3, 2), DType::F32, &device).unwrap(),
            1,
            1,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch { what: "edge_features target", expected: 3, got: 2 }
        ));
    }

    #[test]
    fn test_sample_rejects_too_many_nodes() {
        let device = Device::Cpu;
        let err = GraphSample::new(
            "crowded",
            Tensor::zeros((2, 2, 4), DType::F32, &device).unwrap(),
            Tensor::zeros((2, 3), DType::F32, &device).unwrap(),
            Tensor::zeros((2, 2), DType::F32, &device).unwrap(),
            Tensor::zeros((2, 2), DType::F32, &device).unwrap(),
            2,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NodeCount { .. }));
    }

    #[test]
    fn test_sample_rejects_overflowing_counts() {
        let device = Device::Cpu;
        let err = GraphSample::new(
            "overflow",
            Tensor::zeros((2, 2, 4), DType::F32, &device).unwrap(),
            Tensor::zeros((2, 3), DType::F32, &device).unwrap(),
            Tensor::zeros((2, 2), DType::F32, &device).unwrap(),
            Tensor::zeros((2, 2), DType::F32, &device).unwrap(),
            usize::MAX,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NodeCount { humans: usize::MAX, objects: 1, max_nodes: 2, .. }));
    }

    #[test]
    fn test_collate_pads_to_largest() {
        let batch = GraphBatch::collate(&[sample(2, 1, 1), sample(4, 2, 2)], &Device::Cpu).unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.max_nodes(), 4);
        assert_eq!(batch.edge_features.dims(), &[2, 4, 4, 4]);
        assert_eq!(batch.node_labels.dims(), &[2, 4, 2]);

        // Padded slots of the small sample are zero.
        let nodes = batch.node_features.to_vec3::<f32>().unwrap();
        assert_eq!(nodes[0][1], vec![1.0; 3]);
        assert_eq!(nodes[0][2], vec![0.0; 3]);
        assert_eq!(batch.human_counts, vec![1, 2]);
    }

    #[test]
    fn test_collate_empty() {
        assert!(matches!(
            GraphBatch::collate(&[], &Device::Cpu),
            Err(Error::EmptyBatch)
        ));
    }

    #[test]
    fn test_validate_against_config() {
        let batch = GraphBatch::collate(&[sample(3, 1, 2)], &Device::Cpu).unwrap();
        let ok = GpnnConfig::default()
            .with_feature_sizes(3, 4)
            .with_action_classes(2);
        assert!(batch.validate(&ok).is_ok());

        let wrong = ok.clone().with_action_classes(13);
        assert!(matches!(
            batch.validate(&wrong),
            Err(Error::DimensionMismatch { what: "action_classes", .. })
        ));
    }
}
