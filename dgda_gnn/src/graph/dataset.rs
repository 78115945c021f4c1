use crate::error::{DgdaError, Result};
use crate::graph::data::GraphData;
use crate::graph::transform::OneHotDegree;
use burn::data::dataset::transform::Mapper;
use burn::data::dataset::{Dataset, InMemDataset};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const TWITCH_FEATURE_DIM: usize = 3170;

const CACHE_FILE: &str = "data.ghd";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatasetFamily {
    Citation,
    Twitch,
    Airport,
    Blog,
    Mag,
}

impl DatasetFamily {
    pub fn dir_name(&self) -> &'static str {
        match self {
            DatasetFamily::Citation => "Citation",
            DatasetFamily::Twitch => "Twitch",
            DatasetFamily::Airport => "Airport",
            DatasetFamily::Blog => "Blog",
            DatasetFamily::Mag => "MAG",
        }
    }

    pub fn members(&self) -> &'static [&'static str] {
        match self {
            DatasetFamily::Citation => &["DBLPv7", "ACMv9", "Citationv1"],
            DatasetFamily::Twitch => &["DE", "EN", "ES", "FR", "PT", "RU"],
            DatasetFamily::Airport => &["BRAZIL", "USA", "EUROPE"],
            DatasetFamily::Blog => &["Blog1", "Blog2"],
            DatasetFamily::Mag => &["MAG_CN", "MAG_DE", "MAG_FR", "MAG_JP", "MAG_RU", "MAG_US"],
        }
    }

    pub const ALL: [DatasetFamily; 5] = [
        DatasetFamily::Citation,
        DatasetFamily::Twitch,
        DatasetFamily::Airport,
        DatasetFamily::Blog,
        DatasetFamily::Mag,
    ];
}

/// A dataset name that belongs to one of the known families.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatasetName {
    name: &'static str,
    family: DatasetFamily,
}

impl DatasetName {
    pub fn as_str(&self) -> &'static str {
        self.name
    }

    pub fn family(&self) -> DatasetFamily {
        self.family
    }

    pub fn is_airport(&self) -> bool {
        self.family == DatasetFamily::Airport
    }

    pub fn is_twitch(&self) -> bool {
        self.family == DatasetFamily::Twitch
    }

    /// `<root>/<Family>/<name>`
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(self.family.dir_name()).join(self.name)
    }

    pub fn family_members(family: DatasetFamily) -> Vec<DatasetName> {
        family
            .members()
            .iter()
            .map(|name| DatasetName { name: *name, family })
            .collect()
    }

    pub fn known_names() -> String {
        DatasetFamily::ALL
            .iter()
            .flat_map(|family| family.members().iter().copied())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for DatasetName {
    type Err = DgdaError;

    fn from_str(s: &str) -> Result<Self> {
        DatasetFamily::ALL
            .iter()
            .find_map(|family| {
                family
                    .members()
                    .iter()
                    .find(|name| **name == s)
                    .map(|name| DatasetName {
                        name: *name,
                        family: *family,
                    })
            })
            .ok_or_else(|| DgdaError::UnknownDataset(s.to_string()))
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A named graph dataset. Index 0 is the graph; `get` applies the attached
/// transform, if any.
pub struct GraphDataset {
    name: DatasetName,
    dataset: InMemDataset<GraphData>,
    transform: Option<OneHotDegree>,
}

impl Dataset<GraphData> for GraphDataset {
    fn get(&self, index: usize) -> Option<GraphData> {
        let item = self.dataset.get(index)?;
        Some(match &self.transform {
            Some(transform) => transform.map(&item),
            None => item,
        })
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl GraphDataset {
    /// Opens `<root>/<Family>/<name>`, reading the processed cache when it
    /// exists and otherwise parsing `raw/` and writing the cache.
    pub fn open(root: &Path, name: &DatasetName) -> Result<Self> {
        Self::open_with(root, name, false)
    }

    pub fn open_with(root: &Path, name: &DatasetName, force_reload: bool) -> Result<Self> {
        let dir = name.dir(root);
        let cache_path = dir.join("processed").join(CACHE_FILE);

        let graph = match (force_reload, cache_path.exists()) {
            (false, true) => match GraphData::load(&cache_path) {
                Ok(graph) => {
                    debug!(dataset = %name, path = %cache_path.display(), "loaded processed cache");
                    graph
                }
                Err(err) => {
                    warn!(dataset = %name, %err, "processed cache unreadable, rebuilding");
                    Self::process(&dir, name, &cache_path)?
                }
            },
            _ => Self::process(&dir, name, &cache_path)?,
        };

        Ok(Self {
            name: name.clone(),
            dataset: InMemDataset::new(vec![graph]),
            transform: None,
        })
    }

    fn process(dir: &Path, name: &DatasetName, cache_path: &Path) -> Result<GraphData> {
        let raw = dir.join("raw");
        let graph = match name.family() {
            DatasetFamily::Twitch => read_twitch(&raw, name.as_str())?,
            DatasetFamily::Airport => read_airport(&raw, name.as_str())?,
            DatasetFamily::Citation | DatasetFamily::Blog | DatasetFamily::Mag => {
                read_docs_layout(&raw, name.as_str())?
            }
        };
        info!(
            dataset = %name,
            nodes = graph.get_node_len(),
            edges = graph.num_edges(),
            features = graph.get_node_embedding_size(),
            "processed raw dataset"
        );

        if let Some(parent) = cache_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DgdaError::io(parent, e))?;
        }
        graph.save(cache_path)?;
        Ok(graph)
    }

    pub fn name(&self) -> &DatasetName {
        &self.name
    }

    pub fn set_transform(&mut self, transform: OneHotDegree) {
        self.transform = Some(transform);
    }

    /// The graph at index 0 with the transform applied.
    pub fn graph(&self) -> Result<GraphData> {
        self.get(0)
            .ok_or_else(|| DgdaError::InvalidGraph(format!("dataset {} is empty", self.name)))
    }

    /// The graph at index 0 before any transform.
    pub fn raw_graph(&self) -> Result<GraphData> {
        self.dataset
            .get(0)
            .ok_or_else(|| DgdaError::InvalidGraph(format!("dataset {} is empty", self.name)))
    }
}

/// Non-blank lines of a text file with their 1-based line numbers.
fn read_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let file = File::open(path).map_err(|e| DgdaError::io(path, e))?;
    let mut lines = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| DgdaError::io(path, e))?;
        if !line.trim().is_empty() {
            lines.push((idx + 1, line));
        }
    }
    Ok(lines)
}

fn parse_field<T: FromStr>(path: &Path, line: usize, field: Option<&str>) -> Result<T> {
    let field = field.ok_or_else(|| DgdaError::parse(path, line, "missing field"))?;
    field
        .trim()
        .parse::<T>()
        .map_err(|_| DgdaError::parse(path, line, format!("cannot parse `{field}`")))
}

fn read_edge_pairs(path: &Path, lines: &[(usize, String)], separator: Option<char>) -> Result<Vec<[usize; 2]>> {
    lines
        .par_iter()
        .map(|(line_no, line)| {
            let fields: Vec<&str> = match separator {
                Some(sep) => line.split(sep).collect(),
                None => line.split_whitespace().collect(),
            };
            let mut fields = fields.into_iter();
            let src = parse_field::<usize>(path, *line_no, fields.next())?;
            let dst = parse_field::<usize>(path, *line_no, fields.next())?;
            Ok([src, dst])
        })
        .collect()
}

/// `<name>_docs.txt`, `<name>_edgelist.txt`, `<name>_labels.txt`.
pub fn read_docs_layout(raw: &Path, name: &str) -> Result<GraphData> {
    let docs_path = raw.join(format!("{name}_docs.txt"));
    let edges_path = raw.join(format!("{name}_edgelist.txt"));
    let labels_path = raw.join(format!("{name}_labels.txt"));

    let rows: Vec<(usize, Vec<f32>)> = read_lines(&docs_path)?
        .par_iter()
        .map(|(line_no, line)| {
            let row = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|field| !field.is_empty())
                .map(|field| parse_field::<f32>(&docs_path, *line_no, Some(field)))
                .collect::<Result<Vec<f32>>>()?;
            Ok((*line_no, row))
        })
        .collect::<Result<_>>()?;

    let node_len = rows.len();
    let node_embedding_size = rows.first().map_or(0, |(_, row)| row.len());
    if let Some((line_no, row)) = rows.iter().find(|(_, row)| row.len() != node_embedding_size) {
        return Err(DgdaError::parse(
            &docs_path,
            *line_no,
            format!("expected {node_embedding_size} features, got {}", row.len()),
        ));
    }
    let features: Vec<f32> = rows.into_iter().flat_map(|(_, row)| row).collect();

    let labels = read_lines(&labels_path)?
        .iter()
        .map(|(line_no, line)| parse_field::<i64>(&labels_path, *line_no, line.split_whitespace().last()))
        .collect::<Result<Vec<i64>>>()?;

    let edges = read_edge_pairs(&edges_path, &read_lines(&edges_path)?, None)?;

    GraphData::from_data(features, edges, labels, node_len, node_embedding_size)
}

/// `musae_<name>_edges.csv`, `musae_<name>_features.json`, `musae_<name>_target.csv`.
pub fn read_twitch(raw: &Path, name: &str) -> Result<GraphData> {
    let edges_path = raw.join(format!("musae_{name}_edges.csv"));
    let features_path = raw.join(format!("musae_{name}_features.json"));
    let target_path = raw.join(format!("musae_{name}_target.csv"));

    let mut targets = read_lines(&target_path)?;
    if !targets.is_empty() {
        targets.remove(0);
    }
    let node_len = targets.len();
    let mut labels = vec![0i64; node_len];
    for (line_no, line) in &targets {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 6 {
            return Err(DgdaError::parse(&target_path, *line_no, "expected 6 columns"));
        }
        let mature = match fields[2].trim() {
            "True" | "true" | "1" => 1,
            "False" | "false" | "0" => 0,
            other => {
                return Err(DgdaError::parse(&target_path, *line_no, format!("bad mature flag `{other}`")))
            }
        };
        let node = parse_field::<usize>(&target_path, *line_no, Some(fields[5]))?;
        if node >= node_len {
            return Err(DgdaError::parse(&target_path, *line_no, format!("node id {node} out of range")));
        }
        labels[node] = mature;
    }

    let file = File::open(&features_path).map_err(|e| DgdaError::io(&features_path, e))?;
    let active: HashMap<String, Vec<usize>> =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| DgdaError::Json {
            path: features_path.clone(),
            source,
        })?;

    let mut features = vec![0f32; node_len * TWITCH_FEATURE_DIM];
    for (node, indices) in &active {
        let node = parse_field::<usize>(&features_path, 0, Some(node.as_str()))?;
        if node >= node_len {
            continue;
        }
        for idx in indices.iter().filter(|idx| **idx < TWITCH_FEATURE_DIM) {
            features[node * TWITCH_FEATURE_DIM + idx] = 1.0;
        }
    }

    let mut edge_lines = read_lines(&edges_path)?;
    if !edge_lines.is_empty() {
        edge_lines.remove(0);
    }
    let edges = read_edge_pairs(&edges_path, &edge_lines, Some(','))?;

    GraphData::from_data(features, edges, labels, node_len, TWITCH_FEATURE_DIM)
}

/// `<name>-airports.edgelist` and `labels-<name>-airports.txt`; airport ids
/// are renumbered in label-file order. Airport graphs carry no features.
pub fn read_airport(raw: &Path, name: &str) -> Result<GraphData> {
    let lower = name.to_lowercase();
    let edges_path = raw.join(format!("{lower}-airports.edgelist"));
    let labels_path = raw.join(format!("labels-{lower}-airports.txt"));

    let mut label_lines = read_lines(&labels_path)?;
    if !label_lines.is_empty() {
        label_lines.remove(0);
    }

    let mut index_map: HashMap<usize, usize> = HashMap::new();
    let mut labels = Vec::with_capacity(label_lines.len());
    for (line_no, line) in &label_lines {
        let mut fields = line.split_whitespace();
        let airport = parse_field::<usize>(&labels_path, *line_no, fields.next())?;
        let label = parse_field::<i64>(&labels_path, *line_no, fields.next())?;
        index_map.insert(airport, labels.len());
        labels.push(label);
    }

    let edge_lines = read_lines(&edges_path)?;
    let edges = read_edge_pairs(&edges_path, &edge_lines, None)?
        .into_iter()
        .zip(edge_lines.iter())
        .map(|(pair, (line_no, _))| {
            match (index_map.get(&pair[0]), index_map.get(&pair[1])) {
                (Some(a), Some(b)) => Ok([*a, *b]),
                _ => Err(DgdaError::parse(&edges_path, *line_no, "edge references unlabelled airport")),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let node_len = labels.len();
    GraphData::from_data(Vec::new(), edges, labels, node_len, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn names_resolve_to_families() {
        let cases = [
            ("ACMv9", DatasetFamily::Citation),
            ("RU", DatasetFamily::Twitch),
            ("EUROPE", DatasetFamily::Airport),
            ("Blog2", DatasetFamily::Blog),
            ("MAG_JP", DatasetFamily::Mag),
        ];
        for (name, family) in cases {
            assert_eq!(name.parse::<DatasetName>().unwrap().family(), family);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        for name in ["acmv9", "UK", "", "MAG"] {
            let err = name.parse::<DatasetName>().unwrap_err();
            assert!(matches!(err, DgdaError::UnknownDataset(_)));
        }
        let message = "XX".parse::<DatasetName>().unwrap_err().to_string();
        assert!(message.contains("DBLPv7"));
        assert!(message.contains("MAG_US"));
    }

    #[test]
    fn dataset_dir_follows_family() {
        let name: DatasetName = "MAG_CN".parse().unwrap();
        assert_eq!(name.dir(Path::new("data")), PathBuf::from("data/MAG/MAG_CN"));
        let name: DatasetName = "USA".parse().unwrap();
        assert_eq!(name.dir(Path::new("data")), PathBuf::from("data/Airport/USA"));
    }

    #[test]
    fn reads_docs_layout() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path();
        write(&raw.join("ACMv9_docs.txt"), "1,0,0\n0,1,0\n\n0,0,1\n");
        write(&raw.join("ACMv9_edgelist.txt"), "0 1\n1\t2\n");
        write(&raw.join("ACMv9_labels.txt"), "0\n1\n1\n");

        let graph = read_docs_layout(raw, "ACMv9").unwrap();
        assert_eq!(graph.get_node_len(), 3);
        assert_eq!(graph.get_node_embedding_size(), 3);
        assert_eq!(graph.edges(), &[[0, 1], [1, 2]]);
        assert_eq!(graph.labels(), &[0, 1, 1]);
    }

    #[test]
    fn docs_layout_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path();
        write(&raw.join("ACMv9_docs.txt"), "1,0\n0,x\n");
        write(&raw.join("ACMv9_edgelist.txt"), "0 1\n");
        write(&raw.join("ACMv9_labels.txt"), "0\n1\n");

        match read_docs_layout(raw, "ACMv9") {
            Err(DgdaError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn docs_width_error_counts_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path();
        write(&raw.join("ACMv9_docs.txt"), "\n\n1,0\n0,1,1\n");
        write(&raw.join("ACMv9_edgelist.txt"), "0 1\n");
        write(&raw.join("ACMv9_labels.txt"), "0\n1\n");

        match read_docs_layout(raw, "ACMv9") {
            Err(DgdaError::Parse { line, message, .. }) => {
                assert_eq!(line, 4);
                assert_eq!(message, "expected 2 features, got 3");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn reads_twitch_layout() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path();
        write(&raw.join("musae_DE_edges.csv"), "from,to\n0,1\n1,2\n");
        write(&raw.join("musae_DE_features.json"), r#"{"0": [1, 5], "2": [3169]}"#);
        write(
            &raw.join("musae_DE_target.csv"),
            "id,days,mature,views,partner,new_id\n7,10,True,3,False,2\n8,11,False,4,False,0\n9,12,True,5,True,1\n",
        );

        let graph = read_twitch(raw, "DE").unwrap();
        assert_eq!(graph.get_node_len(), 3);
        assert_eq!(graph.get_node_embedding_size(), TWITCH_FEATURE_DIM);
        assert_eq!(graph.labels(), &[0, 1, 1]);
        assert_eq!(graph.features()[1], 1.0);
        assert_eq!(graph.features()[5], 1.0);
        assert_eq!(graph.features()[2 * TWITCH_FEATURE_DIM + 3169], 1.0);
        assert_eq!(graph.features().iter().filter(|v| **v == 1.0).count(), 3);
    }

    #[test]
    fn reads_airport_layout() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path();
        write(&raw.join("brazil-airports.edgelist"), "100 200\n200 300\n");
        write(&raw.join("labels-brazil-airports.txt"), "node label\n300 2\n100 0\n200 1\n");

        let graph = read_airport(raw, "BRAZIL").unwrap();
        assert_eq!(graph.get_node_embedding_size(), 0);
        assert_eq!(graph.labels(), &[2, 0, 1]);
        assert_eq!(graph.edges(), &[[1, 2], [2, 0]]);
    }

    #[test]
    fn open_writes_and_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let name: DatasetName = "Blog1".parse().unwrap();
        let raw = name.dir(dir.path()).join("raw");
        write(&raw.join("Blog1_docs.txt"), "1 0\n0 1\n");
        write(&raw.join("Blog1_edgelist.txt"), "0 1\n");
        write(&raw.join("Blog1_labels.txt"), "3\n4\n");

        let first = GraphDataset::open(dir.path(), &name).unwrap();
        let cache = name.dir(dir.path()).join("processed").join(CACHE_FILE);
        assert!(cache.exists());

        fs::remove_dir_all(&raw).unwrap();
        let second = GraphDataset::open(dir.path(), &name).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(first.graph().unwrap(), second.graph().unwrap());
    }
}
