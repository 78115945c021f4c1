use crate::cli::BenchmarkArgs;
use crate::error::{DgdaError, Result};
use crate::eval::metrics::{eval_macro_f1, eval_micro_f1, eval_roc_auc};
use crate::eval::report::BenchmarkResult;
use crate::graph::dataset::GraphDataset;
use crate::graph::train::Dgda;
use crate::graph::transform::prepare_pair;
use burn::tensor::backend::AutodiffBackend;
use tracing::info;

/// Loads both domains, trains DGDA, evaluates on the target graph and
/// appends the result line to `args.filename`.
pub fn run<B: AutodiffBackend>(args: &BenchmarkArgs, device: B::Device) -> Result<BenchmarkResult> {
    info!(source = %args.source, target = %args.target, "loading datasets");
    let mut source_dataset = GraphDataset::open(&args.data_root, &args.source)?;
    let mut target_dataset = GraphDataset::open(&args.data_root, &args.target)?;

    let (source_data, target_data) =
        prepare_pair(&args.data_root, &mut source_dataset, &mut target_dataset)?;

    let num_features = source_data.get_node_embedding_size();
    let num_classes = source_data.num_classes();
    if target_data.get_node_embedding_size() != num_features {
        return Err(DgdaError::FeatureMismatch {
            source_dim: num_features,
            target_dim: target_data.get_node_embedding_size(),
        });
    }
    info!(num_features, num_classes, "building DGDA");

    let mut model = Dgda::<B>::new(args.dgda_config(num_features, num_classes), device);
    model.fit(&source_data, &target_data)?;

    if let Some(artifact_dir) = &args.artifact_dir {
        model.save_artifacts(artifact_dir)?;
    }

    let prediction = model.predict(&target_data)?;
    let preds = prediction.preds();

    let micro_f1 = eval_micro_f1(&prediction.labels, &preds)?;
    let macro_f1 = eval_macro_f1(&prediction.labels, &preds)?;
    let auc = if args.source.is_twitch() {
        eval_roc_auc(&prediction.labels, &prediction.max_values())?
    } else {
        0.0
    };

    let result = BenchmarkResult {
        model: "dgda".to_string(),
        source: args.source.to_string(),
        target: args.target.to_string(),
        micro_f1,
        macro_f1,
        auc,
    };
    result.append_to(&args.filename)?;
    Ok(result)
}
