//! Error types for expclient-core.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Experiment not found: {0}")]
    NotFound(i64),

    #[error("Experiment creation rejected: {0}")]
    Creation(String),

    #[error("Experiment activation rejected: {0}")]
    Activation(String),

    #[error("No checkpoints found for experiment {0}")]
    NoCheckpoints(i64),

    #[error("Checkpoint {checkpoint} has no numeric validation metric '{metric}'")]
    MissingMetric { metric: String, checkpoint: String },

    #[error("Experiment config has no searcher metric to rank by")]
    MissingSearcher,

    #[error("Master returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Timed out after {0:?} waiting for experiment to finish")]
    Timeout(Duration),

    #[error("Wait cancelled")]
    Cancelled,

    #[error("Invalid model definition context: {0}")]
    InvalidContext(String),

    #[error("Model definition context is {size} bytes, limit is {limit}")]
    ContextTooLarge { size: u64, limit: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
