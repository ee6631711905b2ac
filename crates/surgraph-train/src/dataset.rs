//! Dataset sources and batching.
//!
//! The trainer only needs [`GraphDataset`]: a length and random access to
//! [`GraphSample`]s. Three sources are provided:
//!
//! - [`InMemoryDataset`] - samples already in memory
//! - [`SafetensorsDataset`] - a directory with one `.safetensors` file per frame
//! - [`SyntheticDataset`] - seeded random graphs with consistent labels
//!
//! [`DataLoader`] draws [`GraphBatch`]es with optional seeded shuffling and
//! `drop_last`.
//!
//! # File layout
//!
//! | Tensor | Shape | Dtype |
//! |--------|-------|-------|
//! | `edge_features` | `[N, N, De]` | f32 |
//! | `node_features` | `[N, Dn]` | f32 |
//! | `adj_mat` | `[N, N]` | f32 |
//! | `node_labels` | `[N, C]` | f32 |
//! | `human_num` | `[1]` | any numeric |
//! | `obj_num` | `[1]` | any numeric |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use surgraph_core::{Error, GraphBatch, GraphSample, Result};

/// Random-access source of graph samples.
pub trait GraphDataset {
    /// Number of samples.
    fn len(&self) -> usize;

    /// Load sample `index`.
    fn get(&self, index: usize) -> Result<GraphSample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Samples held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    samples: Vec<GraphSample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<GraphSample>) -> Self {
        Self { samples }
    }

    /// Materialize every sample of another dataset.
    pub fn from_dataset(dataset: &impl GraphDataset) -> Result<Self> {
        let samples = (0..dataset.len())
            .map(|i| dataset.get(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { samples })
    }
}

impl GraphDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<GraphSample> {
        self.samples.get(index).cloned().ok_or_else(|| {
            Error::EmptyDataset(format!(
                "index {index} out of range for {} samples",
                self.samples.len()
            ))
        })
    }
}

/// One-sample-per-file safetensors directory.
#[derive(Debug, Clone)]
pub struct SafetensorsDataset {
    files: Vec<PathBuf>,
}

impl SafetensorsDataset {
    /// Index every `*.safetensors` file in `dir`, sorted by name.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "safetensors") {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(Error::EmptyDataset(format!(
                "no .safetensors files in {}",
                dir.as_ref().display()
            )));
        }
        Ok(Self { files })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Write one sample in the layout [`SafetensorsDataset`] reads.
    pub fn write_sample(sample: &GraphSample, path: impl AsRef<Path>) -> Result<()> {
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert("edge_features", sample.edge_features.to_device(&device)?);
        tensors.insert("node_features", sample.node_features.to_device(&device)?);
        tensors.insert("adj_mat", sample.adjacency.to_device(&device)?);
        tensors.insert("node_labels", sample.node_labels.to_device(&device)?);
        tensors.insert(
            "human_num",
            Tensor::new(&[sample.human_count as u32], &device)?,
        );
        tensors.insert(
            "obj_num",
            Tensor::new(&[sample.object_count as u32], &device)?,
        );
        candle_core::safetensors::save(&tensors, path.as_ref())?;
        Ok(())
    }
}

impl GraphDataset for SafetensorsDataset {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn get(&self, index: usize) -> Result<GraphSample> {
        let path = self.files.get(index).ok_or_else(|| {
            Error::EmptyDataset(format!(
                "index {index} out of range for {} files",
                self.files.len()
            ))
        })?;
        let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let mut take = |name: &str| {
            tensors.remove(name).ok_or_else(|| {
                Error::Training(format!("{} is missing tensor '{name}'", path.display()))
            })
        };

        let edge_features = take("edge_features")?.to_dtype(DType::F32)?;
        let node_features = take("node_features")?.to_dtype(DType::F32)?;
        let adjacency = take("adj_mat")?.to_dtype(DType::F32)?;
        let node_labels = take("node_labels")?.to_dtype(DType::F32)?;
        let human_count = count_from(&take("human_num")?)?;
        let object_count = count_from(&take("obj_num")?)?;

        let identifier = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        GraphSample::new(
            identifier,
            edge_features,
            node_features,
            adjacency,
            node_labels,
            human_count,
            object_count,
        )
    }
}

/// Reads a stored node count, rejecting anything that is not a small whole number.
fn count_from(t: &Tensor) -> Result<usize> {
    let values = t.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
    match values.first() {
        Some(&v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= f64::from(u32::MAX) => {
            Ok(v as usize)
        }
        _ => Err(Error::Shape {
            what: "node count",
            expected: "one non-negative integer no larger than u32::MAX",
            got: t.dims().to_vec(),
        }),
    }
}

/// Parameters of synthetic graphs.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Number of samples.
    pub samples: usize,
    /// Humans per sample are drawn from `1..=max_humans`.
    pub max_humans: usize,
    /// Objects per sample are drawn from `1..=max_objects`.
    pub max_objects: usize,
    pub node_feature_size: usize,
    pub edge_feature_size: usize,
    pub action_classes: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            samples: 64,
            max_humans: 2,
            max_objects: 3,
            node_feature_size: 200,
            edge_feature_size: 200,
            action_classes: 13,
            seed: 0,
        }
    }
}

/// Seeded random graphs.
///
/// Each human picks one object and one non-idle action. The action is
/// written into both nodes' labels and leaves a bump on the human's node
/// features and on the edge features of the interacting pair, so the task
/// is learnable. Sample `i` depends only on `seed` and `i`.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    config: SyntheticConfig,
}

impl SyntheticDataset {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if config.max_humans == 0 || config.max_objects == 0 {
            return Err(Error::InvalidConfig(
                "synthetic graphs need at least one human and one object".into(),
            ));
        }
        if config.max_humans.checked_add(config.max_objects).is_none() {
            return Err(Error::InvalidConfig(
                "synthetic max_humans + max_objects overflows".into(),
            ));
        }
        if config.node_feature_size == 0 || config.edge_feature_size == 0 {
            return Err(Error::InvalidConfig(
                "synthetic node and edge feature sizes must be positive".into(),
            ));
        }
        if config.action_classes < 2 {
            return Err(Error::InvalidConfig(
                "synthetic graphs need an idle class and at least one action".into(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }
}

impl GraphDataset for SyntheticDataset {
    fn len(&self) -> usize {
        self.config.samples
    }

    fn get(&self, index: usize) -> Result<GraphSample> {
        let c = &self.config;
        if index >= c.samples {
            return Err(Error::EmptyDataset(format!(
                "index {index} out of range for {} samples",
                c.samples
            )));
        }
        let mut rng = StdRng::seed_from_u64(c.seed.wrapping_mul(1_000_003).wrapping_add(index as u64));
        let n = c.max_humans + c.max_objects;
        let humans = rng.gen_range(1..=c.max_humans);
        let objects = rng.gen_range(1..=c.max_objects);
        let valid = humans + objects;

        let mut nodes: Vec<f32> = (0..n * c.node_feature_size)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let mut edges: Vec<f32> = (0..n * n * c.edge_feature_size)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let mut adjacency = vec![0f32; n * n];
        let mut labels = vec![0f32; n * c.action_classes];

        for h in 0..humans {
            let o = humans + rng.gen_range(0..objects);
            let action = rng.gen_range(1..c.action_classes);
            adjacency[h * n + o] = 1.0;
            labels[h * c.action_classes + action] = 1.0;
            labels[o * c.action_classes + action] = 1.0;
            nodes[h * c.node_feature_size + action % c.node_feature_size] += 3.0;
            edges[(h * n + o) * c.edge_feature_size + action % c.edge_feature_size] += 3.0;
        }
        for k in 0..valid {
            let row = &mut labels[k * c.action_classes..(k + 1) * c.action_classes];
            if row.iter().all(|&v| v == 0.0) {
                row[0] = 1.0;
            }
        }
        // Padding slots carry no signal.
        nodes[valid * c.node_feature_size..].fill(0.0);
        for i in 0..n {
            for j in 0..n {
                if i >= valid || j >= valid {
                    let start = (i * n + j) * c.edge_feature_size;
                    edges[start..start + c.edge_feature_size].fill(0.0);
                }
            }
        }

        let device = Device::Cpu;
        GraphSample::new(
            format!("synthetic/{index:06}"),
            Tensor::from_vec(edges, (n, n, c.edge_feature_size), &device)?,
            Tensor::from_vec(nodes, (n, c.node_feature_size), &device)?,
            Tensor::from_vec(adjacency, (n, n), &device)?,
            Tensor::from_vec(labels, (n, c.action_classes), &device)?,
            humans,
            objects,
        )
    }
}

/// Batches over a dataset.
pub struct DataLoader<'a, D: GraphDataset> {
    dataset: &'a D,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: u64,
    device: Device,
}

impl<'a, D: GraphDataset> DataLoader<'a, D> {
    pub fn new(dataset: &'a D, batch_size: usize, device: Device) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle: false,
            drop_last: false,
            seed: 0,
            device,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool, seed: u64) -> Self {
        self.shuffle = shuffle;
        self.seed = seed;
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample order for `epoch`; shuffled orders differ between epochs.
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Iterate the batches of one epoch.
    pub fn epoch(&self, epoch: usize) -> impl Iterator<Item = Result<GraphBatch>> + 'a {
        let order = self.order(epoch);
        let batches = self.len();
        let dataset = self.dataset;
        let batch_size = self.batch_size;
        let device = self.device.clone();
        (0..batches).map(move |b| {
            let start = b * batch_size;
            let end = (start + batch_size).min(order.len());
            let samples = order[start..end]
                .iter()
                .map(|&i| dataset.get(i))
                .collect::<Result<Vec<_>>>()?;
            GraphBatch::collate(&samples, &device)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(samples: usize) -> SyntheticDataset {
        SyntheticDataset::new(SyntheticConfig {
            samples,
            node_feature_size: 6,
            edge_feature_size: 5,
            action_classes: 4,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let ds = synthetic(4);
        let a = ds.get(2).unwrap();
        let b = ds.get(2).unwrap();
        assert_eq!(a.human_count, b.human_count);
        assert_eq!(
            a.node_features.to_vec2::<f32>().unwrap(),
            b.node_features.to_vec2::<f32>().unwrap()
        );
        assert!(ds.get(4).is_err());
    }

    #[test]
    fn test_synthetic_edges_are_human_to_object() {
        let ds = synthetic(16);
        for i in 0..ds.len() {
            let s = ds.get(i).unwrap();
            let adj = s.adjacency.to_vec2::<f32>().unwrap();
            let mut edges = 0;
            for (r, row) in adj.iter().enumerate() {
                for (c, &v) in row.iter().enumerate() {
                    if v > 0.0 {
                        edges += 1;
                        assert!(surgraph_core::is_valid_interaction(
                            r,
                            c,
                            s.human_count,
                            s.object_count
                        ));
                    }
                }
            }
            assert_eq!(edges, s.human_count);
        }
    }

    #[test]
    fn test_synthetic_rejects_zero_feature_sizes() {
        for (node, edge) in [(0, 5), (6, 0)] {
            let err = SyntheticDataset::new(SyntheticConfig {
                node_feature_size: node,
                edge_feature_size: edge,
                ..Default::default()
            })
            .unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)));
        }
        let err = SyntheticDataset::new(SyntheticConfig {
            max_humans: usize::MAX,
            max_objects: 1,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_count_from_requires_whole_numbers() {
        let count = |v: f32| count_from(&Tensor::new(&[v], &Device::Cpu).unwrap());
        assert_eq!(count(3.0).unwrap(), 3);
        assert_eq!(count(0.0).unwrap(), 0);
        for bad in [f32::INFINITY, f32::NAN, 1e30, 1.5, -1.0] {
            assert!(matches!(count(bad), Err(Error::Shape { what: "node count", .. })));
        }
        let empty = Tensor::zeros(0, DType::F32, &Device::Cpu).unwrap();
        assert!(count_from(&empty).is_err());
    }

    #[test]
    fn test_loader_batch_counts() {
        let ds = synthetic(5);
        let keep = DataLoader::new(&ds, 2, Device::Cpu);
        assert_eq!(keep.len(), 3);
        let batches: Vec<_> = keep.epoch(0).collect::<Result<_>>().unwrap();
        assert_eq!(batches.last().unwrap().batch_size(), 1);

        let drop = DataLoader::new(&ds, 2, Device::Cpu).with_drop_last(true);
        assert_eq!(drop.len(), 2);
        assert_eq!(drop.epoch(0).count(), 2);
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let ds = synthetic(20);
        let loader = DataLoader::new(&ds, 4, Device::Cpu).with_shuffle(true, 7);
        let a = loader.order(0);
        assert_eq!(a, loader.order(0));
        assert_ne!(a, loader.order(1));
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_in_memory_out_of_range() {
        let ds = InMemoryDataset::from_dataset(&synthetic(2)).unwrap();
        assert_eq!(ds.len(), 2);
        assert!(ds.get(2).is_err());
    }
}
