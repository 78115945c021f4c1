use crate::error::{self, DgdaError};
use crate::graph::data::{GraphData, GraphDataBatch, GraphDataBatcher};
use crate::graph::model::{entropy_loss, reconstruction_loss, DgdaModel, DgdaModelConfig, Latents};
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::{debug, info};

#[derive(Config)]
pub struct DgdaConfig {
    pub model: DgdaModelConfig,
    pub optimizer: AdamConfig,
    #[config(default = 200)]
    pub num_epochs: usize,
    #[config(default = 200)]
    pub seed: u64,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 1.0)]
    pub recons_w: f64,
    #[config(default = 0.5)]
    pub beta: f64,
    #[config(default = 1.0)]
    pub ent_w: f64,
    #[config(default = 1.0)]
    pub d_w: f64,
    #[config(default = 1.0)]
    pub y_w: f64,
    #[config(default = 0.1)]
    pub m_w: f64,
    #[config(default = 1.0)]
    pub grl_lambda: f64,
    #[config(default = 10)]
    pub log_every: usize,
}

/// Loss components of one training epoch, already weighted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpochLoss {
    pub epoch: usize,
    pub total: f64,
    pub reconstruction: f64,
    pub kl: f64,
    pub classification: f64,
    pub domain: f64,
    pub entropy: f64,
    pub manipulation: f64,
}

/// Class logits and ground-truth labels of a predicted graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub logits: Vec<f32>,
    pub labels: Vec<i64>,
    pub num_classes: usize,
}

impl Prediction {
    /// Row-wise argmax of the logits.
    pub fn preds(&self) -> Vec<i64> {
        self.rows()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0usize, f32::NEG_INFINITY), |best, (idx, v)| {
                        if *v > best.1 {
                            (idx, *v)
                        } else {
                            best
                        }
                    })
                    .0 as i64
            })
            .collect()
    }

    /// Row-wise maximum of the logits.
    pub fn max_values(&self) -> Vec<f32> {
        self.rows()
            .map(|row| row.iter().copied().fold(f32::NEG_INFINITY, f32::max))
            .collect()
    }

    fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.logits.chunks(self.num_classes.max(1))
    }
}

/// Positive edges of one graph as index tensors, plus its node count for
/// negative sampling.
struct EdgeTargets<B: Backend> {
    src: Tensor<B, 1, Int>,
    dst: Tensor<B, 1, Int>,
    count: usize,
    node_len: usize,
}

impl<B: Backend> EdgeTargets<B> {
    fn new(batch: &GraphDataBatch<B>, device: &B::Device) -> Self {
        let count = batch.edges.len();
        let src: Vec<i64> = batch.edges.iter().map(|pair| pair[0] as i64).collect();
        let dst: Vec<i64> = batch.edges.iter().map(|pair| pair[1] as i64).collect();
        Self {
            src: Tensor::from_data(TensorData::new(src, [count]), device),
            dst: Tensor::from_data(TensorData::new(dst, [count]), device),
            count,
            node_len: batch.node_len,
        }
    }

    /// As many uniformly random node pairs as there are positive edges.
    fn sample_negatives(&self, rng: &mut StdRng, device: &B::Device) -> (Tensor<B, 1, Int>, Tensor<B, 1, Int>) {
        let src: Vec<i64> = (0..self.count)
            .map(|_| rng.gen_range(0..self.node_len) as i64)
            .collect();
        let dst: Vec<i64> = (0..self.count)
            .map(|_| rng.gen_range(0..self.node_len) as i64)
            .collect();
        (
            Tensor::from_data(TensorData::new(src, [self.count]), device),
            Tensor::from_data(TensorData::new(dst, [self.count]), device),
        )
    }
}

fn permutation<B: Backend>(node_len: usize, rng: &mut StdRng, device: &B::Device) -> Tensor<B, 1, Int> {
    let mut order: Vec<i64> = (0..node_len as i64).collect();
    order.shuffle(rng);
    Tensor::from_data(TensorData::new(order, [node_len]), device)
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor.clone().into_scalar().elem::<f64>()
}

/// The DGDA graph domain-adaptation model with its training state.
pub struct Dgda<B: AutodiffBackend> {
    config: DgdaConfig,
    model: DgdaModel<B>,
    device: B::Device,
}

impl<B: AutodiffBackend> Dgda<B> {
    pub fn new(config: DgdaConfig, device: B::Device) -> Self {
        B::seed(config.seed);
        let model = config.model.init::<B>(&device);
        Self {
            config,
            model,
            device,
        }
    }

    pub fn config(&self) -> &DgdaConfig {
        &self.config
    }

    pub fn model(&self) -> &DgdaModel<B> {
        &self.model
    }

    /// Trains on the labelled `source` graph and the unlabelled `target` graph.
    pub fn fit(&mut self, source: &GraphData, target: &GraphData) -> error::Result<Vec<EpochLoss>> {
        if source.get_node_embedding_size() != self.config.model.in_dim
            || target.get_node_embedding_size() != self.config.model.in_dim
        {
            return Err(DgdaError::FeatureMismatch {
                source_dim: source.get_node_embedding_size(),
                target_dim: target.get_node_embedding_size(),
            });
        }
        let num_classes = self.config.model.num_classes as i64;
        if let Some(label) = source.labels().iter().find(|l| **l < 0 || **l >= num_classes) {
            return Err(DgdaError::InvalidGraph(format!(
                "source label {label} outside 0..{num_classes}"
            )));
        }
        if source.get_node_len() == 0 || target.get_node_len() == 0 {
            return Err(DgdaError::InvalidGraph("cannot train on an empty graph".to_string()));
        }

        let batcher = GraphDataBatcher::<B>::new(self.device.clone());
        let source_batch = batcher.try_batch(std::slice::from_ref(source))?;
        let target_batch = batcher.try_batch(std::slice::from_ref(target))?;
        let source_edges = EdgeTargets::new(&source_batch, &self.device);
        let target_edges = EdgeTargets::new(&target_batch, &self.device);

        let source_domain = Tensor::<B, 1, Int>::zeros([source_batch.node_len], &self.device);
        let target_domain = Tensor::<B, 1, Int>::ones([target_batch.node_len], &self.device);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut optim = self.config.optimizer.init();
        let cross_entropy = CrossEntropyLossConfig::new().init(&self.device);

        info!(
            epochs = self.config.num_epochs,
            source_nodes = source_batch.node_len,
            target_nodes = target_batch.node_len,
            "training DGDA"
        );

        let mut history = Vec::with_capacity(self.config.num_epochs);
        for epoch in 1..=self.config.num_epochs {
            let source_latents = self.model.encode(&source_batch, true);
            let target_latents = self.model.encode(&target_batch, true);

            let reconstruction = (self.reconstruction(&source_latents, &source_edges, None, &mut rng)
                + self.reconstruction(&target_latents, &target_edges, None, &mut rng))
            .mul_scalar(self.config.recons_w);

            let manipulation = {
                let source_perm = permutation::<B>(source_batch.node_len, &mut rng, &self.device);
                let target_perm = permutation::<B>(target_batch.node_len, &mut rng, &self.device);
                (self.reconstruction(&source_latents, &source_edges, Some(source_perm), &mut rng)
                    + self.reconstruction(&target_latents, &target_edges, Some(target_perm), &mut rng))
                .mul_scalar(self.config.m_w)
            };

            let kl = (source_latents.kl_divergence() + target_latents.kl_divergence())
                .mul_scalar(self.config.beta);

            let classification = cross_entropy
                .forward(self.model.classify(&source_latents), source_batch.targets.clone())
                .mul_scalar(self.config.y_w);

            let lambda = self.config.grl_lambda;
            let domain = (cross_entropy.forward(self.model.discriminate(&source_latents), source_domain.clone())
                + cross_entropy.forward(self.model.discriminate(&target_latents), target_domain.clone())
                + cross_entropy.forward(
                    self.model.discriminate_adversarial(&source_latents, lambda),
                    source_domain.clone(),
                )
                + cross_entropy.forward(
                    self.model.discriminate_adversarial(&target_latents, lambda),
                    target_domain.clone(),
                ))
            .mul_scalar(self.config.d_w);

            let entropy = entropy_loss(self.model.classify(&target_latents)).mul_scalar(self.config.ent_w);

            let loss = reconstruction.clone()
                + kl.clone()
                + classification.clone()
                + domain.clone()
                + entropy.clone()
                + manipulation.clone();

            let record = EpochLoss {
                epoch,
                total: scalar(&loss),
                reconstruction: scalar(&reconstruction),
                kl: scalar(&kl),
                classification: scalar(&classification),
                domain: scalar(&domain),
                entropy: scalar(&entropy),
                manipulation: scalar(&manipulation),
            };
            debug!(?record, "epoch losses");
            if self.config.log_every > 0 && (epoch % self.config.log_every == 0 || epoch == self.config.num_epochs) {
                info!(
                    epoch,
                    loss = record.total,
                    classification = record.classification,
                    "epoch finished"
                );
            }
            history.push(record);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = optim.step(self.config.learning_rate, self.model.clone(), grads);
        }

        Ok(history)
    }

    fn reconstruction(
        &self,
        latents: &Latents<B>,
        edges: &EdgeTargets<B>,
        permutation: Option<Tensor<B, 1, Int>>,
        rng: &mut StdRng,
    ) -> Tensor<B, 1> {
        if edges.count == 0 {
            return Tensor::zeros([1], &self.device);
        }
        let joint = match permutation {
            Some(permutation) => latents.joint_permuted(permutation),
            None => latents.joint(),
        };
        let (neg_src, neg_dst) = edges.sample_negatives(rng, &self.device);
        let positive = self
            .model
            .edge_logits(joint.clone(), edges.src.clone(), edges.dst.clone());
        let negative = self.model.edge_logits(joint, neg_src, neg_dst);
        reconstruction_loss(positive, negative)
    }

    /// Class logits for every node of `data`, computed without sampling or dropout.
    pub fn predict(&self, data: &GraphData) -> error::Result<Prediction> {
        let model = self.model.valid();
        let batch = GraphDataBatcher::<B::InnerBackend>::new(self.device.clone())
            .try_batch(std::slice::from_ref(data))?;

        let logits = model.forward(&batch);
        let [_, num_classes] = logits.dims();
        let logits = logits
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| DgdaError::InvalidGraph(format!("cannot read logits: {err:?}")))?;

        Ok(Prediction {
            logits,
            labels: data.labels().to_vec(),
            num_classes,
        })
    }

    /// Writes `config.json` and the trained weights under `artifact_dir`.
    pub fn save_artifacts(&self, artifact_dir: &Path) -> error::Result<()> {
        std::fs::create_dir_all(artifact_dir).map_err(|e| DgdaError::io(artifact_dir, e))?;
        let config_path = artifact_dir.join("config.json");
        self.config
            .save(&config_path)
            .map_err(|e| DgdaError::io(&config_path, e))?;
        self.model
            .clone()
            .save_file(artifact_dir.join("model"), &CompactRecorder::new())
            .map_err(|err| DgdaError::Record(format!("{err:?}")))?;
        info!(dir = %artifact_dir.display(), "saved config and trained model");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction() -> Prediction {
        Prediction {
            logits: vec![0.1, 0.9, 0.7, 0.2, -1.0, -3.0],
            labels: vec![1, 0, 1],
            num_classes: 2,
        }
    }

    #[test]
    fn preds_take_row_argmax() {
        assert_eq!(prediction().preds(), vec![1, 0, 0]);
    }

    #[test]
    fn max_values_take_row_maximum() {
        assert_eq!(prediction().max_values(), vec![0.9, 0.7, -1.0]);
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = DgdaConfig::new(DgdaModelConfig::new(8, 3), AdamConfig::new())
            .with_m_w(0.25)
            .with_num_epochs(7);
        config.save(&path).unwrap();

        let loaded = DgdaConfig::load(&path).unwrap();
        assert_eq!(loaded.m_w, 0.25);
        assert_eq!(loaded.num_epochs, 7);
        assert_eq!(loaded.model.num_classes, 3);
    }

    #[test]
    fn new_builds_model_from_config() {
        type TestAutodiffBackend = burn::backend::Autodiff<burn::backend::NdArray>;

        let config = DgdaConfig::new(
            DgdaModelConfig::new(3, 2).with_hid_dim(4).with_y_dim(4).with_m_dim(2).with_d_dim(2),
            AdamConfig::new(),
        );
        let dgda = Dgda::<TestAutodiffBackend>::new(config, Default::default());

        assert_eq!(dgda.config().model.in_dim, 3);
        assert!(dgda.model().num_params() > 0);
    }

    #[test]
    fn config_defaults_match_benchmark() {
        let config = DgdaConfig::new(DgdaModelConfig::new(8, 3), AdamConfig::new());
        assert_eq!(config.num_epochs, 200);
        assert_eq!(config.beta, 0.5);
        assert_eq!(config.m_w, 0.1);
        assert_eq!(config.model.y_dim, 256);
        assert_eq!(config.model.m_dim, 128);
    }
}
