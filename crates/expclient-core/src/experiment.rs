//! Experiment handle: one remote experiment plus the operations over it.
//!
//! A handle caches the last snapshot the master returned. Nothing mutates it
//! locally; `refresh`, `activate` and `await_completion` replace it with a
//! fresh one.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{CheckpointFilter, CreateExperimentRequest, ExperimentApi};
use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::models::{
    CheckpointRecord, ExperimentConfig, ExperimentSnapshot, ExperimentState, MetricSource,
};
use crate::ranking::{self, RankingSpec};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How `await_completion` waits.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// Give up with `ClientError::Timeout` after this long.
    pub timeout: Option<Duration>,
    /// Give up with `ClientError::Cancelled` once this fires.
    pub cancel: Option<CancellationToken>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            cancel: None,
        }
    }
}

impl WaitOptions {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

pub struct ExperimentHandle {
    api: Arc<dyn ExperimentApi>,
    snapshot: ExperimentSnapshot,
    metric_source: MetricSource,
}

impl ExperimentHandle {
    pub fn from_snapshot(api: Arc<dyn ExperimentApi>, snapshot: ExperimentSnapshot) -> Self {
        Self {
            api,
            snapshot,
            metric_source: MetricSource::default(),
        }
    }

    pub fn with_metric_source(mut self, source: MetricSource) -> Self {
        self.metric_source = source;
        self
    }

    /// Submit `config` with the packaged model definition, then activate the
    /// new experiment. The master does all validation.
    pub async fn create(
        api: Arc<dyn ExperimentApi>,
        config: &ExperimentConfig,
        context: Context,
    ) -> Result<Self> {
        let request = CreateExperimentRequest {
            experiment_config: config.to_yaml_string()?,
            model_definition: context.entries,
            validate_only: false,
        };
        info!(
            files = request.model_definition.len(),
            master = api.master(),
            "Creating experiment"
        );
        let snapshot = api
            .create_experiment(&request)
            .await
            .map_err(|e| rejected(e, ClientError::Creation))?;

        let mut handle = Self::from_snapshot(api, snapshot);
        info!(experiment = handle.id(), "Experiment created");
        handle.activate().await?;
        Ok(handle)
    }

    pub async fn fetch(api: Arc<dyn ExperimentApi>, id: i64) -> Result<Self> {
        let snapshot = api.get_experiment(id).await?;
        Ok(Self::from_snapshot(api, snapshot))
    }

    pub fn id(&self) -> i64 {
        self.snapshot.id
    }

    pub fn state(&self) -> ExperimentState {
        self.snapshot.state
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.snapshot.config
    }

    pub fn description(&self) -> Option<&str> {
        self.snapshot.description.as_deref()
    }

    pub fn master(&self) -> &str {
        self.api.master()
    }

    pub fn snapshot(&self) -> &ExperimentSnapshot {
        &self.snapshot
    }

    pub fn metric_source(&self) -> MetricSource {
        self.metric_source
    }

    /// Re-fetch the experiment and replace the cached snapshot.
    pub async fn refresh(&mut self) -> Result<ExperimentState> {
        self.snapshot = self.api.get_experiment(self.snapshot.id).await?;
        Ok(self.snapshot.state)
    }

    /// Cached state only; call `refresh` first for a live answer.
    pub fn is_successful(&self) -> bool {
        self.snapshot.state == ExperimentState::Completed
    }

    /// Poll until the experiment leaves `ACTIVE` and return the state it
    /// reached. Waits `poll_interval` between checks, no backoff.
    pub async fn await_completion(&mut self, opts: WaitOptions) -> Result<ExperimentState> {
        let deadline = opts.timeout.map(|t| Instant::now() + t);
        let id = self.snapshot.id;
        let interval = opts.poll_interval;

        let poll = async {
            loop {
                let state = self.refresh().await?;
                if state != ExperimentState::Active {
                    return Ok(state);
                }
                debug!(experiment = id, ?interval, "Still active, waiting");
                tokio::time::sleep(interval).await;
            }
        };
        let cancelled = async {
            match &opts.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            result = poll => result,
            _ = cancelled => Err(ClientError::Cancelled),
            _ = expired => Err(ClientError::Timeout(opts.timeout.unwrap_or_default())),
        };
        if let Ok(state) = &outcome {
            info!(experiment = id, %state, "Experiment finished");
        }
        outcome
    }

    /// Ask the master to move the experiment to `ACTIVE`.
    pub async fn activate(&mut self) -> Result<()> {
        let id = self.snapshot.id;
        self.snapshot = self
            .api
            .patch_experiment_state(id, ExperimentState::Active)
            .await
            .map_err(|e| rejected(e, ClientError::Activation))?;
        info!(experiment = id, state = %self.snapshot.state, "Experiment activated");
        Ok(())
    }

    /// The single best checkpoint; see [`Self::top_n_checkpoints`].
    pub async fn top_checkpoint(
        &self,
        sort_by: Option<&str>,
        smaller_is_better: Option<bool>,
    ) -> Result<CheckpointRecord> {
        self.top_n_checkpoints(1, sort_by, smaller_is_better)
            .await?
            .into_iter()
            .next()
            .ok_or(ClientError::NoCheckpoints(self.snapshot.id))
    }

    /// Best checkpoint of each of the top `limit` distinct trials, best first.
    ///
    /// Only checkpoints that completed with a completed validation are
    /// considered. Without `sort_by` the searcher metric is used, read from
    /// the config selected by this handle's [`MetricSource`]; in that case
    /// `smaller_is_better` is ignored. With `sort_by` and no direction the
    /// metric is sorted descending.
    pub async fn top_n_checkpoints(
        &self,
        limit: usize,
        sort_by: Option<&str>,
        smaller_is_better: Option<bool>,
    ) -> Result<Vec<CheckpointRecord>> {
        let id = self.snapshot.id;
        let checkpoints = self
            .api
            .list_checkpoints(id, &CheckpointFilter::completed())
            .await?;
        if checkpoints.is_empty() {
            return Err(ClientError::NoCheckpoints(id));
        }

        let spec = RankingSpec::resolve(
            sort_by,
            smaller_is_better,
            self.metric_source,
            &self.snapshot.config,
            &checkpoints,
        )?;
        debug!(
            experiment = id,
            candidates = checkpoints.len(),
            metric = %spec.metric,
            smaller_is_better = spec.smaller_is_better,
            "Ranking checkpoints"
        );
        ranking::top_n(checkpoints, &spec, limit)
    }
}

impl std::fmt::Display for ExperimentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Experiment(id={})", self.snapshot.id)
    }
}

impl std::fmt::Debug for ExperimentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentHandle")
            .field("master", &self.api.master())
            .field("snapshot", &self.snapshot)
            .field("metric_source", &self.metric_source)
            .finish()
    }
}

/// Reclassify a plain API rejection as the operation-specific error.
fn rejected(err: ClientError, wrap: fn(String) -> ClientError) -> ClientError {
    match err {
        ClientError::Api { status, message } => wrap(format!("{status}: {message}")),
        other => other,
    }
}
