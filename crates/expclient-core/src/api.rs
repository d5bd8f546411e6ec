//! Master REST API: the `ExperimentApi` seam and its `reqwest` implementation.
//!
//! Responses are deserialized into the `*Resource` wire structs below and
//! converted into the typed models through `From` impls.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::context::ContextEntry;
use crate::error::{ClientError, Result};
use crate::models::{
    CheckpointRecord, CheckpointState, ExperimentConfig, ExperimentSnapshot, ExperimentState,
};

/// Typed operations the SDK needs from the master.
#[async_trait]
pub trait ExperimentApi: Send + Sync {
    /// Base address of the master, e.g. `http://localhost:8080`.
    fn master(&self) -> &str;

    async fn create_experiment(&self, request: &CreateExperimentRequest)
        -> Result<ExperimentSnapshot>;

    async fn get_experiment(&self, id: i64) -> Result<ExperimentSnapshot>;

    async fn patch_experiment_state(
        &self,
        id: i64,
        state: ExperimentState,
    ) -> Result<ExperimentSnapshot>;

    async fn list_checkpoints(
        &self,
        id: i64,
        filter: &CheckpointFilter,
    ) -> Result<Vec<CheckpointRecord>>;
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// Body of `POST /api/v1/experiments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExperimentRequest {
    /// The config rendered as YAML text.
    pub experiment_config: String,
    pub model_definition: Vec<ContextEntry>,
    pub validate_only: bool,
}

/// Body of `PATCH /api/v1/experiments/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchExperimentRequest {
    pub state: ExperimentState,
}

/// Server-side filters for listing checkpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointFilter {
    pub states: Vec<CheckpointState>,
    pub validation_states: Vec<CheckpointState>,
}

impl CheckpointFilter {
    /// Checkpoints that are completed and whose validation completed too.
    pub fn completed() -> Self {
        Self {
            states: vec![CheckpointState::Completed],
            validation_states: vec![CheckpointState::Completed],
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, &'static str)> {
        let states = self.states.iter().map(|s| ("states", s.as_query_value()));
        let validation = self
            .validation_states
            .iter()
            .map(|s| ("validation_states", s.as_query_value()));
        states.chain(validation).collect()
    }

    pub fn matches(&self, ckpt: &CheckpointRecord) -> bool {
        (self.states.is_empty() || self.states.contains(&ckpt.state))
            && (self.validation_states.is_empty()
                || self.validation_states.contains(&ckpt.validation_state))
    }
}

impl Default for CheckpointFilter {
    fn default() -> Self {
        Self::completed()
    }
}

// ─── Wire resources ──────────────────────────────────────────────────────────

/// `{experiment: {...}, config: {...}}` as returned by GET/POST/PATCH.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentEnvelope {
    pub experiment: ExperimentResource,
    #[serde(default)]
    pub config: Option<ExperimentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResource {
    pub id: i64,
    #[serde(default)]
    pub state: ExperimentState,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Option<ExperimentConfig>,
}

impl From<ExperimentEnvelope> for ExperimentSnapshot {
    fn from(env: ExperimentEnvelope) -> Self {
        let ExperimentEnvelope { experiment, config } = env;
        ExperimentSnapshot {
            id: experiment.id,
            state: experiment.state,
            description: experiment.description,
            config: config.or(experiment.config).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointList {
    #[serde(default)]
    pub checkpoints: Vec<CheckpointResource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointResource {
    pub uuid: Uuid,
    pub trial_id: i64,
    #[serde(default)]
    pub batch_number: Option<i64>,
    #[serde(default)]
    pub state: CheckpointState,
    #[serde(default)]
    pub validation_state: CheckpointState,
    #[serde(default)]
    pub metrics: Option<CheckpointMetrics>,
    #[serde(default)]
    pub experiment_config: ExperimentConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetrics {
    #[serde(default)]
    pub validation_metrics: BTreeMap<String, Value>,
}

impl From<CheckpointResource> for CheckpointRecord {
    fn from(r: CheckpointResource) -> Self {
        CheckpointRecord {
            uuid: r.uuid,
            trial_id: r.trial_id,
            batch_number: r.batch_number,
            state: r.state,
            validation_state: r.validation_state,
            validation_metrics: r.metrics.unwrap_or_default().validation_metrics,
            experiment_config: r.experiment_config,
        }
    }
}

// ─── HTTP client ─────────────────────────────────────────────────────────────

/// `ExperimentApi` over HTTP(S) with optional bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    http: reqwest::Client,
    master: String,
    token: Option<String>,
}

impl HttpApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("expclient/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            master: config.master_url(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1{}", self.master, path);
        debug!(%method, %url, "Master request");
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Decode a success body, or turn the failure into a `ClientError`.
/// A 404 becomes `NotFound(id)` when the request targeted a known id.
async fn decode<T: DeserializeOwned>(resp: Response, id: Option<i64>) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    if let (StatusCode::NOT_FOUND, Some(id)) = (status, id) {
        return Err(ClientError::NotFound(id));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// The master wraps errors as `{"error": {"error": "..."}}` or `{"message": "..."}`;
/// fall back to the raw body.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/error")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error"))
        })
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl ExperimentApi for HttpApiClient {
    fn master(&self) -> &str {
        &self.master
    }

    async fn create_experiment(
        &self,
        request: &CreateExperimentRequest,
    ) -> Result<ExperimentSnapshot> {
        let resp = self
            .request(Method::POST, "/experiments")
            .json(request)
            .send()
            .await?;
        let env: ExperimentEnvelope = decode(resp, None).await?;
        Ok(env.into())
    }

    async fn get_experiment(&self, id: i64) -> Result<ExperimentSnapshot> {
        let resp = self
            .request(Method::GET, &format!("/experiments/{id}"))
            .send()
            .await?;
        let env: ExperimentEnvelope = decode(resp, Some(id)).await?;
        Ok(env.into())
    }

    async fn patch_experiment_state(
        &self,
        id: i64,
        state: ExperimentState,
    ) -> Result<ExperimentSnapshot> {
        let resp = self
            .request(Method::PATCH, &format!("/experiments/{id}"))
            .json(&PatchExperimentRequest { state })
            .send()
            .await?;
        let env: ExperimentEnvelope = decode(resp, Some(id)).await?;
        Ok(env.into())
    }

    async fn list_checkpoints(
        &self,
        id: i64,
        filter: &CheckpointFilter,
    ) -> Result<Vec<CheckpointRecord>> {
        let resp = self
            .request(Method::GET, &format!("/experiments/{id}/checkpoints"))
            .query(&filter.query_pairs())
            .send()
            .await?;
        let list: CheckpointList = decode(resp, Some(id)).await?;
        Ok(list.checkpoints.into_iter().map(CheckpointRecord::from).collect())
    }
}
