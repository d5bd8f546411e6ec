//! expclient-core: typed client for a remote experiment tracking master.
//!
//! The master owns scheduling, checkpoint storage and validation. This crate
//! maps its REST resources onto typed handles, waits on experiment state, and
//! ranks checkpoints by a validation metric.

pub mod api;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod experiment;
pub mod models;
pub mod ranking;
pub mod telemetry;

pub use api::{CheckpointFilter, ExperimentApi, HttpApiClient};
pub use client::Client;
pub use config::ClientConfig;
pub use context::{Context, ContextEntry};
pub use error::{ClientError, Result};
pub use experiment::{ExperimentHandle, WaitOptions};
pub use models::{
    CheckpointRecord, CheckpointState, ExperimentConfig, ExperimentSnapshot, ExperimentState,
    MetricSource, SearcherSpec,
};
pub use ranking::RankingSpec;
pub use tokio_util::sync::CancellationToken;
