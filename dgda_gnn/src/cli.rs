//! Command-line surface of the benchmark driver.

use crate::error::DgdaError;
use crate::graph::dataset::DatasetName;
use crate::graph::model::DgdaModelConfig;
use crate::graph::train::DgdaConfig;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::AdamConfig;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

/// Train DGDA on a source graph, evaluate it on a target graph and append
/// the metrics to a results file.
#[derive(Parser, Debug, Clone)]
#[command(name = "dgda", version)]
pub struct BenchmarkArgs {
    /// Random seed
    #[arg(long, default_value_t = 200)]
    pub seed: u64,

    /// Number of GCN layers
    #[arg(long, alias = "num_layers", default_value_t = 2)]
    pub num_layers: usize,

    /// Learning rate
    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    /// Weight decay
    #[arg(long, alias = "weight_decay", default_value_t = 0.0)]
    pub weight_decay: f32,

    /// Hidden size
    #[arg(long, default_value_t = 64)]
    pub nhid: usize,

    /// Dropout ratio
    #[arg(long, alias = "dropout_ratio", default_value_t = 0.1)]
    pub dropout_ratio: f64,

    /// Compute device: default, cpu, cuda:N, discrete:N or integrated:N
    #[arg(long, default_value = "default")]
    pub device: DeviceSpec,

    /// Source domain dataset, e.g. DBLPv7, ACMv9, Citationv1, DE, USA, Blog1, MAG_CN
    #[arg(long, default_value = "DE")]
    pub source: DatasetName,

    /// Target domain dataset
    #[arg(long, default_value = "EN")]
    pub target: DatasetName,

    /// Maximum number of epochs
    #[arg(long, default_value_t = 200)]
    pub epochs: usize,

    /// File the result line is appended to
    #[arg(long, default_value = "test.txt")]
    pub filename: PathBuf,

    /// Dimension of the graph decoder hidden layer
    #[arg(long, alias = "dec_dim", default_value_t = 64)]
    pub dec_dim: usize,

    /// Dimension of the domain latent variables
    #[arg(long, alias = "d_dim", default_value_t = 64)]
    pub d_dim: usize,

    /// Dimension of the semantic latent variables
    #[arg(long, alias = "y_dim", default_value_t = 256)]
    pub y_dim: usize,

    /// Dimension of the random latent variables
    #[arg(long, alias = "m_dim", default_value_t = 128)]
    pub m_dim: usize,

    /// Trade-off weight for reconstruction loss
    #[arg(long, alias = "recons_w", default_value_t = 1.0)]
    pub recons_w: f64,

    /// Trade-off weight for KL loss
    #[arg(long, default_value_t = 0.5)]
    pub beta: f64,

    /// Trade-off weight for entropy loss
    #[arg(long, alias = "ent_w", default_value_t = 1.0)]
    pub ent_w: f64,

    /// Trade-off weight for domain loss
    #[arg(long, alias = "d_w", default_value_t = 1.0)]
    pub d_w: f64,

    /// Trade-off weight for cross entropy loss
    #[arg(long, alias = "y_w", default_value_t = 1.0)]
    pub y_w: f64,

    /// Trade-off weight for manipulating reconstruction loss
    #[arg(long, alias = "m_w", default_value_t = 0.1)]
    pub m_w: f64,

    /// Root directory holding the <Family>/<name> dataset folders
    #[arg(long, default_value = "data", env = "DGDA_DATA_ROOT")]
    pub data_root: PathBuf,

    /// Directory for config.json and trained weights; nothing is saved when unset
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Log a loss summary every N epochs (0 disables)
    #[arg(long, default_value_t = 10)]
    pub log_every: usize,
}

impl BenchmarkArgs {
    /// Training configuration for graphs with `in_dim` features and `num_classes` labels.
    pub fn dgda_config(&self, in_dim: usize, num_classes: usize) -> DgdaConfig {
        let model = DgdaModelConfig::new(in_dim, num_classes)
            .with_hid_dim(self.nhid)
            .with_num_layers(self.num_layers)
            .with_dropout(self.dropout_ratio)
            .with_dec_dim(self.dec_dim)
            .with_d_dim(self.d_dim)
            .with_y_dim(self.y_dim)
            .with_m_dim(self.m_dim);

        let optimizer = if self.weight_decay > 0.0 {
            AdamConfig::new().with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay.into())))
        } else {
            AdamConfig::new()
        };

        DgdaConfig::new(model, optimizer)
            .with_num_epochs(self.epochs)
            .with_seed(self.seed)
            .with_learning_rate(self.lr)
            .with_recons_w(self.recons_w)
            .with_beta(self.beta)
            .with_ent_w(self.ent_w)
            .with_d_w(self.d_w)
            .with_y_w(self.y_w)
            .with_m_w(self.m_w)
            .with_log_every(self.log_every)
    }
}

/// Backend-independent device selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceSpec {
    Default,
    Cpu,
    Discrete(usize),
    Integrated(usize),
}

impl FromStr for DeviceSpec {
    type Err = DgdaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || DgdaError::UnknownDevice(s.to_string());
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => (kind, Some(index.parse::<usize>().map_err(|_| unknown())?)),
            None => (s, None),
        };

        match (kind, index) {
            ("default", None) => Ok(DeviceSpec::Default),
            ("cpu", None) => Ok(DeviceSpec::Cpu),
            ("cuda" | "gpu" | "discrete", index) => Ok(DeviceSpec::Discrete(index.unwrap_or(0))),
            ("integrated", index) => Ok(DeviceSpec::Integrated(index.unwrap_or(0))),
            _ => Err(unknown()),
        }
    }
}
