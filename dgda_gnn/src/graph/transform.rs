use crate::error::Result;
use crate::graph::data::GraphData;
use crate::graph::dataset::{DatasetFamily, DatasetName, GraphDataset};
use burn::data::dataset::transform::Mapper;
use std::path::Path;
use tracing::{debug, info};

/// Appends a one-hot encoding of each node's out-degree to its features.
///
/// The encoding has `max_degree + 1` columns; larger degrees land in the last one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OneHotDegree {
    max_degree: usize,
}

impl OneHotDegree {
    pub fn new(max_degree: usize) -> Self {
        Self { max_degree }
    }
}

impl Mapper<GraphData, GraphData> for OneHotDegree {
    fn map(&self, item: &GraphData) -> GraphData {
        let degrees = item.degrees();
        item.with_appended_features(self.max_degree + 1, |node, one_hot| {
            one_hot[degrees[node].min(self.max_degree)] = 1.0;
        })
    }
}

/// Largest out-degree over every Airport dataset under `root`.
pub fn airport_max_degree(root: &Path) -> Result<usize> {
    let mut max_degree = 0;
    for name in DatasetName::family_members(DatasetFamily::Airport) {
        let dataset = GraphDataset::open(root, &name)?;
        let data_degree = dataset.raw_graph()?.max_degree();
        debug!(dataset = %name, data_degree, "airport degree scan");
        if data_degree > max_degree {
            max_degree = data_degree;
        }
    }
    Ok(max_degree)
}

/// Applies the degree augmentation and edge symmetrisation that depend on the
/// source dataset, returning the source and target graphs ready for training.
///
/// Airport sources get a one-hot degree encoding on both sides. Unless the
/// source is a Twitch graph, directed edge lists are made undirected.
pub fn prepare_pair(
    root: &Path,
    source_dataset: &mut GraphDataset,
    target_dataset: &mut GraphDataset,
) -> Result<(GraphData, GraphData)> {
    let source_name = source_dataset.name().clone();

    if source_name.is_airport() {
        let max_degree = airport_max_degree(root)?;
        info!(max_degree, "attaching one-hot degree features");
        target_dataset.set_transform(OneHotDegree::new(max_degree));
        source_dataset.set_transform(OneHotDegree::new(max_degree));
    }

    let mut source_data = source_dataset.graph()?;
    let mut target_data = target_dataset.graph()?;

    if !source_name.is_twitch() {
        for data in [&mut source_data, &mut target_data] {
            if !data.is_undirected() {
                data.to_undirected();
            }
        }
    }

    Ok((source_data, target_data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> GraphData {
        GraphData::from_data(
            vec![0.5; 4],
            vec![[0, 1], [0, 2], [0, 3], [1, 0]],
            vec![0, 1, 0, 1],
            4,
            1,
        )
        .unwrap()
    }

    #[test]
    fn one_hot_degree_appends_columns() {
        let graph = OneHotDegree::new(3).map(&star());

        assert_eq!(graph.get_node_embedding_size(), 5);
        let rows: Vec<&[f32]> = graph.features().chunks(5).collect();
        assert_eq!(rows[0], &[0.5, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], &[0.5, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(rows[2], &[0.5, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn one_hot_degree_clamps_large_degrees() {
        let graph = OneHotDegree::new(1).map(&star());
        let rows: Vec<&[f32]> = graph.features().chunks(3).collect();
        assert_eq!(rows[0], &[0.5, 0.0, 1.0]);
    }

    #[test]
    fn one_hot_degree_on_featureless_graph() {
        let graph = GraphData::from_data(Vec::new(), vec![[0, 1]], vec![0, 0], 2, 0).unwrap();
        let graph = OneHotDegree::new(2).map(&graph);
        assert_eq!(graph.features(), &[0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }
}
