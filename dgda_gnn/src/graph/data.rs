use crate::error::{DgdaError, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A single attributed graph held in host memory.
///
/// Node features are stored row-major as `[node_len, node_embedding_size]`.
/// The edge list is directed; an undirected graph carries both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    features: Vec<f32>,
    edges: Vec<[usize; 2]>,
    labels: Vec<i64>,
    node_len: usize,
    node_embedding_size: usize,
}

impl GraphData {
    pub fn from_data(
        features: Vec<f32>,
        edges: Vec<[usize; 2]>,
        labels: Vec<i64>,
        node_len: usize,
        node_embedding_size: usize,
    ) -> Result<GraphData> {
        if features.len() != node_len * node_embedding_size {
            return Err(DgdaError::InvalidGraph(format!(
                "expected {} feature values for {node_len} nodes of width {node_embedding_size}, got {}",
                node_len * node_embedding_size,
                features.len()
            )));
        }
        if labels.len() != node_len {
            return Err(DgdaError::InvalidGraph(format!(
                "expected {node_len} labels, got {}",
                labels.len()
            )));
        }
        if let Some(pair) = edges.iter().find(|pair| pair[0] >= node_len || pair[1] >= node_len) {
            return Err(DgdaError::InvalidGraph(format!(
                "edge {:?} references a node outside 0..{node_len}",
                pair
            )));
        }

        Ok(GraphData {
            features,
            edges,
            labels,
            node_len,
            node_embedding_size,
        })
    }

    pub fn get_node_len(&self) -> usize {
        self.node_len
    }

    pub fn get_node_embedding_size(&self) -> usize {
        self.node_embedding_size
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn features(&self) -> &[f32] {
        &self.features
    }

    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    /// Number of distinct label values.
    pub fn num_classes(&self) -> usize {
        self.labels.iter().collect::<BTreeSet<_>>().len()
    }

    /// Out-degree of every node, counted on the source column of the edge list.
    pub fn degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0usize; self.node_len];
        for pair in &self.edges {
            degrees[pair[0]] += 1;
        }
        degrees
    }

    pub fn max_degree(&self) -> usize {
        self.degrees().into_iter().max().unwrap_or(0)
    }

    pub fn is_undirected(&self) -> bool {
        let edge_set: HashSet<(usize, usize)> =
            self.edges.iter().map(|pair| (pair[0], pair[1])).collect();
        edge_set.iter().all(|(a, b)| edge_set.contains(&(*b, *a)))
    }

    /// Adds the reverse of every edge, then sorts and removes duplicates.
    pub fn to_undirected(&mut self) {
        let mut edges: Vec<[usize; 2]> = self
            .edges
            .iter()
            .flat_map(|pair| [*pair, [pair[1], pair[0]]])
            .collect();
        edges.par_sort_unstable();
        edges.dedup();
        self.edges = edges;
    }

    /// Returns a copy of the graph whose feature matrix has `extra_width`
    /// additional columns filled by `fill(node, row)`.
    pub fn with_appended_features<F>(&self, extra_width: usize, fill: F) -> GraphData
    where
        F: Fn(usize, &mut [f32]) + Sync,
    {
        let old_width = self.node_embedding_size;
        let new_width = old_width + extra_width;
        let mut node_array = vec![0f32; self.node_len * new_width];

        node_array
            .par_chunks_mut(new_width.max(1))
            .take(self.node_len)
            .enumerate()
            .for_each(|(idx, node)| {
                node[..old_width]
                    .copy_from_slice(&self.features[idx * old_width..(idx + 1) * old_width]);
                fill(idx, &mut node[old_width..]);
            });

        GraphData {
            features: node_array,
            edges: self.edges.clone(),
            labels: self.labels.clone(),
            node_len: self.node_len,
            node_embedding_size: new_width,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let cache_err = |source: bincode::Error| DgdaError::Cache {
            path: path.to_path_buf(),
            source,
        };
        let io_err = |source: std::io::Error| DgdaError::io(path, source);

        let features_bin = bincode::serialize(&self.features).map_err(cache_err)?;
        let edges_bin = bincode::serialize(&self.edges).map_err(cache_err)?;
        let labels_bin = bincode::serialize(&self.labels).map_err(cache_err)?;

        let mut file = BufWriter::new(File::create(path).map_err(io_err)?);

        file.write_all(&(self.node_len as u64).to_le_bytes()).map_err(io_err)?;
        file.write_all(&(self.node_embedding_size as u64).to_le_bytes())
            .map_err(io_err)?;

        for blob in [&features_bin, &edges_bin, &labels_bin] {
            file.write_all(&(blob.len() as u64).to_le_bytes()).map_err(io_err)?;
        }
        for blob in [&features_bin, &edges_bin, &labels_bin] {
            file.write_all(blob).map_err(io_err)?;
        }
        file.flush().map_err(io_err)
    }

    pub fn load(path: &Path) -> Result<GraphData> {
        let cache_err = |source: bincode::Error| DgdaError::Cache {
            path: path.to_path_buf(),
            source,
        };
        let io_err = |source: std::io::Error| DgdaError::io(path, source);

        let mut file = BufReader::new(File::open(path).map_err(io_err)?);

        let mut header = [[0u8; 8]; 5];
        for word in header.iter_mut() {
            file.read_exact(word).map_err(io_err)?;
        }
        let [node_len, node_embedding_size, features_len, edges_len, labels_len] =
            header.map(|word| u64::from_le_bytes(word) as usize);

        let mut features_bin = vec![0u8; features_len];
        let mut edges_bin = vec![0u8; edges_len];
        let mut labels_bin = vec![0u8; labels_len];

        file.read_exact(&mut features_bin).map_err(io_err)?;
        file.read_exact(&mut edges_bin).map_err(io_err)?;
        file.read_exact(&mut labels_bin).map_err(io_err)?;

        let features: Vec<f32> = bincode::deserialize(&features_bin).map_err(cache_err)?;
        let edges: Vec<[usize; 2]> = bincode::deserialize(&edges_bin).map_err(cache_err)?;
        let labels: Vec<i64> = bincode::deserialize(&labels_bin).map_err(cache_err)?;

        GraphData::from_data(features, edges, labels, node_len, node_embedding_size)
    }
}

/// Device-side view of one or more graphs, ready for GCN propagation.
///
/// `src`/`dst`/`norm` describe the propagation edges including one self loop
/// per node, weighted by `deg(src)^-1/2 * deg(dst)^-1/2`. `edges` keeps the
/// original positive edges for the reconstruction loss.
#[derive(Clone, Debug)]
pub struct GraphDataBatch<B: Backend> {
    pub node_tensor: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
    pub src: Tensor<B, 1, Int>,
    pub dst: Tensor<B, 1, Int>,
    pub norm: Tensor<B, 2>,
    pub edges: Vec<[usize; 2]>,
    pub node_len: usize,
}

#[derive(Clone)]
pub struct GraphDataBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> GraphDataBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Merges `items` into one disjoint-union graph, shifting node ids of
    /// each graph past those of the graphs before it.
    pub fn try_batch(&self, items: &[GraphData]) -> Result<GraphDataBatch<B>> {
        let width = items.first().map_or(0, |g| g.node_embedding_size);
        if let Some(other) = items.iter().find(|g| g.node_embedding_size != width) {
            return Err(DgdaError::FeatureMismatch {
                source_dim: width,
                target_dim: other.node_embedding_size,
            });
        }

        let node_len: usize = items.iter().map(|g| g.node_len).sum();
        let mut features = Vec::with_capacity(node_len * width);
        let mut labels = Vec::with_capacity(node_len);
        let mut edges = Vec::new();

        let mut offset = 0usize;
        for graph in items {
            features.extend_from_slice(&graph.features);
            labels.extend_from_slice(&graph.labels);
            edges.extend(
                graph
                    .edges
                    .iter()
                    .map(|pair| [pair[0] + offset, pair[1] + offset]),
            );
            offset += graph.node_len;
        }

        let (src, dst, norm) = gcn_propagation(&edges, node_len);
        let edge_count = src.len();

        let node_tensor = Tensor::from_data(TensorData::new(features, [node_len, width]), &self.device);
        let targets = Tensor::from_data(TensorData::new(labels, [node_len]), &self.device);
        let src = Tensor::from_data(TensorData::new(src, [edge_count]), &self.device);
        let dst = Tensor::from_data(TensorData::new(dst, [edge_count]), &self.device);
        let norm = Tensor::from_data(TensorData::new(norm, [edge_count, 1]), &self.device);

        Ok(GraphDataBatch {
            node_tensor,
            targets,
            src,
            dst,
            norm,
            edges,
            node_len,
        })
    }
}

impl<B: Backend> Batcher<GraphData, GraphDataBatch<B>> for GraphDataBatcher<B> {
    /// # Panics
    ///
    /// Panics if the graphs do not share one feature width.
    fn batch(&self, items: Vec<GraphData>) -> GraphDataBatch<B> {
        match self.try_batch(&items) {
            Ok(batch) => batch,
            Err(err) => panic!("cannot batch graphs: {err}"),
        }
    }
}

/// Propagation edges with self loops and symmetric normalisation.
///
/// Degrees are counted on the destination column, self loop included.
pub(crate) fn gcn_propagation(edges: &[[usize; 2]], node_len: usize) -> (Vec<i64>, Vec<i64>, Vec<f32>) {
    let mut src: Vec<i64> = Vec::with_capacity(edges.len() + node_len);
    let mut dst: Vec<i64> = Vec::with_capacity(edges.len() + node_len);

    for pair in edges.iter().filter(|pair| pair[0] != pair[1]) {
        src.push(pair[0] as i64);
        dst.push(pair[1] as i64);
    }
    for node in 0..node_len {
        src.push(node as i64);
        dst.push(node as i64);
    }

    let mut degree = vec![0f32; node_len];
    for d in &dst {
        degree[*d as usize] += 1.0;
    }
    let inv_sqrt: Vec<f32> = degree.iter().map(|d| 1.0 / d.sqrt()).collect();

    let norm = src
        .par_iter()
        .zip(dst.par_iter())
        .map(|(s, d)| inv_sqrt[*s as usize] * inv_sqrt[*d as usize])
        .collect();

    (src, dst, norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn path_graph() -> GraphData {
        GraphData::from_data(
            vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            vec![[0, 1], [1, 2]],
            vec![0, 1, 1],
            3,
            2,
        )
        .unwrap()
    }

    #[test]
    fn rejects_inconsistent_shapes() {
        assert!(GraphData::from_data(vec![0.0; 5], vec![], vec![0, 0, 0], 3, 2).is_err());
        assert!(GraphData::from_data(vec![0.0; 6], vec![], vec![0, 0], 3, 2).is_err());
        assert!(GraphData::from_data(vec![0.0; 6], vec![[0, 3]], vec![0, 0, 0], 3, 2).is_err());
    }

    #[test]
    fn degrees_count_source_column() {
        let graph = path_graph();
        assert_eq!(graph.degrees(), vec![1, 1, 0]);
        assert_eq!(graph.max_degree(), 1);
        assert_eq!(graph.num_classes(), 2);
    }

    #[test]
    fn to_undirected_adds_reverse_edges_once() {
        let mut graph = path_graph();
        assert!(!graph.is_undirected());

        graph.to_undirected();
        assert!(graph.is_undirected());
        assert_eq!(graph.edges(), &[[0, 1], [1, 0], [1, 2], [2, 1]]);

        graph.to_undirected();
        assert_eq!(graph.num_edges(), 4);
        assert_eq!(graph.degrees(), vec![1, 2, 1]);
    }

    #[test]
    fn appended_features_keep_old_columns() {
        let graph = path_graph().with_appended_features(1, |idx, extra| extra[0] = idx as f32);
        assert_eq!(graph.get_node_embedding_size(), 3);
        assert_eq!(graph.features(), &[1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 2.0]);
    }

    #[test]
    fn save_and_load_preserve_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ghd");
        let graph = path_graph();

        graph.save(&path).unwrap();
        assert_eq!(GraphData::load(&path).unwrap(), graph);
    }

    #[test]
    fn load_rejects_truncated_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ghd");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        assert!(matches!(GraphData::load(&path), Err(DgdaError::Io { .. })));
    }

    #[test]
    fn propagation_normalises_with_self_loops() {
        let (src, dst, norm) = gcn_propagation(&[[0, 1], [1, 0]], 2);
        assert_eq!(src, vec![0, 1, 0, 1]);
        assert_eq!(dst, vec![1, 0, 0, 1]);
        norm.iter().for_each(|w| assert!((w - 0.5).abs() < 1e-6));
    }

    #[test]
    fn batcher_shifts_node_ids() {
        let batcher = GraphDataBatcher::<NdArray>::new(Default::default());
        let batch = batcher.batch(vec![path_graph(), path_graph()]);

        assert_eq!(batch.node_len, 6);
        assert_eq!(batch.node_tensor.dims(), [6, 2]);
        assert_eq!(batch.targets.dims(), [6]);
        assert_eq!(batch.edges, vec![[0, 1], [1, 2], [3, 4], [4, 5]]);
        assert_eq!(batch.src.dims(), [10]);
        assert_eq!(batch.norm.dims(), [10, 1]);
    }

    #[test]
    fn batcher_rejects_mixed_widths() {
        let batcher = GraphDataBatcher::<NdArray>::new(Default::default());
        let wide = path_graph().with_appended_features(2, |_, _| {});

        assert!(matches!(
            batcher.try_batch(&[path_graph(), wide]),
            Err(DgdaError::FeatureMismatch { source_dim: 2, target_dim: 4 })
        ));
    }
}
