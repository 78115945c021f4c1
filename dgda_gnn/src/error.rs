use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DgdaError>;

#[derive(Debug, Error)]
pub enum DgdaError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("unknown dataset `{0}` (known: {known})", known = crate::graph::dataset::DatasetName::known_names())]
    UnknownDataset(String),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("source has {source_dim} node features but target has {target_dim}")]
    FeatureMismatch { source_dim: usize, target_dim: usize },

    #[error("graph cache {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("model record: {0}")]
    Record(String),

    #[error("metric error: {0}")]
    Metric(String),

    #[error("unknown device `{0}`")]
    UnknownDevice(String),
}

impl DgdaError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DgdaError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        DgdaError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
