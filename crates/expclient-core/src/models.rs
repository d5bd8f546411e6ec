//! Data models for expclient.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Lifecycle state of an experiment on the master.
///
/// The master speaks `STATE_ACTIVE`, `STATE_COMPLETED`, ...; the bare names
/// (`ACTIVE`, `COMPLETED`) are accepted on input as well.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ExperimentState {
    #[serde(rename = "STATE_ACTIVE", alias = "ACTIVE")]
    Active,
    #[serde(rename = "STATE_PAUSED", alias = "PAUSED")]
    Paused,
    #[serde(rename = "STATE_STOPPING_CANCELED", alias = "STOPPING_CANCELED")]
    StoppingCanceled,
    #[serde(rename = "STATE_STOPPING_COMPLETED", alias = "STOPPING_COMPLETED")]
    StoppingCompleted,
    #[serde(rename = "STATE_STOPPING_ERROR", alias = "STOPPING_ERROR")]
    StoppingError,
    #[serde(rename = "STATE_CANCELED", alias = "CANCELED")]
    Canceled,
    #[serde(rename = "STATE_COMPLETED", alias = "COMPLETED")]
    Completed,
    #[serde(rename = "STATE_ERROR", alias = "ERROR")]
    Error,
    #[serde(rename = "STATE_DELETING", alias = "DELETING")]
    Deleting,
    #[serde(rename = "STATE_DELETE_FAILED", alias = "DELETE_FAILED")]
    DeleteFailed,
    #[default]
    #[serde(rename = "STATE_UNSPECIFIED", alias = "UNSPECIFIED")]
    Unspecified,
}

impl ExperimentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentState::Active => "ACTIVE",
            ExperimentState::Paused => "PAUSED",
            ExperimentState::StoppingCanceled => "STOPPING_CANCELED",
            ExperimentState::StoppingCompleted => "STOPPING_COMPLETED",
            ExperimentState::StoppingError => "STOPPING_ERROR",
            ExperimentState::Canceled => "CANCELED",
            ExperimentState::Completed => "COMPLETED",
            ExperimentState::Error => "ERROR",
            ExperimentState::Deleting => "DELETING",
            ExperimentState::DeleteFailed => "DELETE_FAILED",
            ExperimentState::Unspecified => "UNSPECIFIED",
        }
    }
}

impl std::fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a checkpoint, or of the validation attached to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CheckpointState {
    #[serde(rename = "STATE_ACTIVE", alias = "ACTIVE")]
    Active,
    #[serde(rename = "STATE_COMPLETED", alias = "COMPLETED")]
    Completed,
    #[serde(rename = "STATE_ERROR", alias = "ERROR")]
    Error,
    #[serde(rename = "STATE_DELETED", alias = "DELETED")]
    Deleted,
    #[default]
    #[serde(rename = "STATE_UNSPECIFIED", alias = "UNSPECIFIED")]
    Unspecified,
}

impl CheckpointState {
    /// Value used in `states=` / `validation_states=` query filters.
    pub fn as_query_value(&self) -> &'static str {
        match self {
            CheckpointState::Active => "ACTIVE",
            CheckpointState::Completed => "COMPLETED",
            CheckpointState::Error => "ERROR",
            CheckpointState::Deleted => "DELETED",
            CheckpointState::Unspecified => "UNSPECIFIED",
        }
    }
}

impl std::fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_query_value())
    }
}

/// The searcher block of an experiment config: which validation metric the
/// search optimizes and in which direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearcherSpec {
    pub metric: String,
    pub smaller_is_better: bool,
}

/// An experiment configuration as submitted to (and echoed by) the master.
///
/// The content is free-form; only the `searcher` block is interpreted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentConfig(Value);

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self(Value::Object(Default::default()))
    }
}

impl From<Value> for ExperimentConfig {
    fn from(v: Value) -> Self {
        Self(v)
    }
}

impl ExperimentConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(Self(serde_yaml::from_str(content)?))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// `searcher.metric` and `searcher.smaller_is_better`.
    ///
    /// `smaller_is_better` defaults to `true` when the block omits it, which is
    /// what the master assumes as well.
    pub fn searcher(&self) -> Option<SearcherSpec> {
        let searcher = self.0.get("searcher")?;
        let metric = searcher.get("metric")?.as_str()?.to_string();
        let smaller_is_better = searcher
            .get("smaller_is_better")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Some(SearcherSpec {
            metric,
            smaller_is_better,
        })
    }
}

/// Point-in-time view of an experiment as reported by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub id: i64,
    pub state: ExperimentState,
    pub description: Option<String>,
    pub config: ExperimentConfig,
}

/// A completed checkpoint together with the validation that scored it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub uuid: Uuid,
    pub trial_id: i64,
    pub batch_number: Option<i64>,
    pub state: CheckpointState,
    pub validation_state: CheckpointState,
    pub validation_metrics: BTreeMap<String, Value>,
    pub experiment_config: ExperimentConfig,
}

impl CheckpointRecord {
    /// Numeric value of a validation metric. Non-numeric values count as missing.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.validation_metrics.get(name).and_then(Value::as_f64)
    }

    /// The searcher metric of the experiment that produced this checkpoint,
    /// paired with its `smaller_is_better` flag.
    pub fn searcher_metric(&self) -> Option<(f64, bool)> {
        let searcher = self.experiment_config.searcher()?;
        let value = self.metric(&searcher.metric)?;
        Some((value, searcher.smaller_is_better))
    }

    /// True when both checkpoints carry their searcher metric, this one's
    /// experiment minimizes it, and this value is strictly lower.
    ///
    /// Larger-is-better metrics never compare as better; callers that need a
    /// symmetric ordering should rank with [`crate::ranking::top_n`].
    pub fn is_better_than(&self, other: &CheckpointRecord) -> bool {
        match (self.searcher_metric(), other.searcher_metric()) {
            (Some((mine, smaller_is_better)), Some((theirs, _))) => {
                smaller_is_better && mine < theirs
            }
            _ => false,
        }
    }
}

/// Where `top_n_checkpoints` reads the searcher metric from when the caller
/// does not name one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// The experiment config embedded in the first returned checkpoint.
    #[default]
    CheckpointConfig,
    /// The config cached on the experiment handle.
    ExperimentConfig,
}
