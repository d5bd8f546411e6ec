//! Entry point: holds the configuration and a shared API client.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::api::{ExperimentApi, HttpApiClient};
use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::Result;
use crate::experiment::{ExperimentHandle, WaitOptions};
use crate::models::ExperimentConfig;

#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    api: Arc<dyn ExperimentApi>,
}

impl Client {
    /// Connect to the master named in `config` over HTTP.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(HttpApiClient::new(&config)?);
        info!(master = api.master(), "Client ready");
        Ok(Self { config, api })
    }

    /// Use a caller-supplied API implementation.
    pub fn with_api(config: ClientConfig, api: Arc<dyn ExperimentApi>) -> Self {
        Self { config, api }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> Arc<dyn ExperimentApi> {
        Arc::clone(&self.api)
    }

    /// Package `context_dir`, create the experiment and activate it.
    pub async fn create_experiment(
        &self,
        config: &ExperimentConfig,
        context_dir: &Path,
    ) -> Result<ExperimentHandle> {
        let context = Context::from_local(context_dir)?;
        let handle = ExperimentHandle::create(self.api(), config, context).await?;
        Ok(handle.with_metric_source(self.config.metric_source))
    }

    pub async fn get_experiment(&self, id: i64) -> Result<ExperimentHandle> {
        let handle = ExperimentHandle::fetch(self.api(), id).await?;
        Ok(handle.with_metric_source(self.config.metric_source))
    }

    /// Wait options seeded with the configured poll interval.
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions::default().with_poll_interval(self.config.poll_interval())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("master", &self.api.master())
            .finish_non_exhaustive()
    }
}
