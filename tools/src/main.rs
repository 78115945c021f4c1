use anyhow::{Context, Result};
use clap::Parser;
use dgda_gnn::graph::dataset::{DatasetName, GraphDataset};
use dgda_gnn::graph::transform::airport_max_degree;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parse raw dataset files into the processed graph cache and print statistics.
#[derive(Parser, Debug)]
#[command(name = "tools")]
struct Args {
    /// Datasets to preprocess, e.g. ACMv9 DE USA
    #[arg(required = true)]
    names: Vec<DatasetName>,

    /// Root directory holding the <Family>/<name> dataset folders
    #[arg(long, default_value = "data", env = "DGDA_DATA_ROOT")]
    data_root: PathBuf,

    /// Rebuild the cache even when one exists
    #[arg(long)]
    force: bool,
}

struct Stats {
    name: DatasetName,
    nodes: usize,
    edges: usize,
    features: usize,
    classes: usize,
    max_degree: usize,
    undirected: bool,
}

/// First occurrence of each name, in order. Duplicates would write the same
/// cache file from two workers.
fn unique_names(names: &[DatasetName]) -> Vec<&DatasetName> {
    let mut seen = HashSet::new();
    names.iter().filter(|name| seen.insert(*name)).collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dgda_gnn=info".parse()?)
                .add_directive("tools=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let stats = unique_names(&args.names)
        .par_iter()
        .map(|name| {
            let dataset = GraphDataset::open_with(&args.data_root, name, args.force)
                .with_context(|| format!("preprocessing {name}"))?;
            let graph = dataset.raw_graph()?;
            info!(dataset = %name, nodes = graph.get_node_len(), edges = graph.num_edges(), "processed");
            Ok(Stats {
                name: (*name).clone(),
                nodes: graph.get_node_len(),
                edges: graph.num_edges(),
                features: graph.get_node_embedding_size(),
                classes: graph.num_classes(),
                max_degree: graph.max_degree(),
                undirected: graph.is_undirected(),
            })
        })
        .collect::<Result<Vec<Stats>>>()?;

    println!("name,nodes,edges,features,classes,max_degree,undirected");
    for s in &stats {
        println!(
            "{},{},{},{},{},{},{}",
            s.name, s.nodes, s.edges, s.features, s.classes, s.max_degree, s.undirected
        );
    }

    if stats.iter().any(|s| s.name.is_airport()) {
        let max_degree = airport_max_degree(&args.data_root)
            .context("scanning airport degrees")?;
        println!("airport one-hot degree width: {}", max_degree + 1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_names_are_processed_once() {
        let names: Vec<DatasetName> = ["DE", "ACMv9", "DE", "USA", "ACMv9"]
            .iter()
            .map(|name| name.parse().unwrap())
            .collect();
        let unique: Vec<&str> = unique_names(&names).iter().map(|name| name.as_str()).collect();
        assert_eq!(unique, vec!["DE", "ACMv9", "USA"]);
    }
}
