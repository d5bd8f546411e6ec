//! Top-N checkpoint selection.
//!
//! Checkpoints are ordered by one validation metric with a stable sort, so
//! equal values keep the order the master returned them in. After sorting,
//! only the first (best) checkpoint of each trial survives.

use std::collections::HashSet;

use crate::error::{ClientError, Result};
use crate::models::{CheckpointRecord, ExperimentConfig, MetricSource};

/// Metric and direction used to rank checkpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingSpec {
    pub metric: String,
    pub smaller_is_better: bool,
}

impl RankingSpec {
    pub fn new(metric: impl Into<String>, smaller_is_better: bool) -> Self {
        Self {
            metric: metric.into(),
            smaller_is_better,
        }
    }

    /// Decide what to rank by.
    ///
    /// An explicit `sort_by` wins and is paired with the caller's direction,
    /// descending when none was given. Otherwise both the metric and the
    /// direction come from the searcher block selected by `source`, and
    /// `smaller_is_better` is ignored.
    pub fn resolve(
        sort_by: Option<&str>,
        smaller_is_better: Option<bool>,
        source: MetricSource,
        experiment_config: &ExperimentConfig,
        checkpoints: &[CheckpointRecord],
    ) -> Result<Self> {
        if let Some(metric) = sort_by.filter(|m| !m.is_empty()) {
            return Ok(Self::new(metric, smaller_is_better.unwrap_or(false)));
        }

        let config = match source {
            MetricSource::CheckpointConfig => checkpoints
                .first()
                .map(|c| &c.experiment_config)
                .ok_or(ClientError::MissingSearcher)?,
            MetricSource::ExperimentConfig => experiment_config,
        };
        let searcher = config.searcher().ok_or(ClientError::MissingSearcher)?;
        Ok(Self::new(searcher.metric, searcher.smaller_is_better))
    }
}

/// Best `limit` checkpoints under `spec`, at most one per trial, best first.
///
/// Every checkpoint must carry the metric; the first one that does not fails
/// the whole call with [`ClientError::MissingMetric`].
pub fn top_n(
    checkpoints: Vec<CheckpointRecord>,
    spec: &RankingSpec,
    limit: usize,
) -> Result<Vec<CheckpointRecord>> {
    let mut keyed = Vec::with_capacity(checkpoints.len());
    for ckpt in checkpoints {
        let value = ckpt
            .metric(&spec.metric)
            .ok_or_else(|| ClientError::MissingMetric {
                metric: spec.metric.clone(),
                checkpoint: ckpt.uuid.to_string(),
            })?;
        keyed.push((value, ckpt));
    }

    // slice::sort_by is stable
    if spec.smaller_is_better {
        keyed.sort_by(|(a, _), (b, _)| a.total_cmp(b));
    } else {
        keyed.sort_by(|(a, _), (b, _)| b.total_cmp(a));
    }

    let mut seen_trials = HashSet::new();
    Ok(keyed
        .into_iter()
        .map(|(_, ckpt)| ckpt)
        .filter(|ckpt| seen_trials.insert(ckpt.trial_id))
        .take(limit)
        .collect())
}
