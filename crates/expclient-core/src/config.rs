//! Client configuration: YAML file, then environment, then explicit overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::models::MetricSource;

pub const ENV_MASTER: &str = "EXPCLIENT_MASTER";
pub const ENV_TOKEN: &str = "EXPCLIENT_TOKEN";

/// Connection and behaviour settings for the SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Master address. `host:port` is accepted and treated as plain HTTP.
    pub master: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Delay between state checks while waiting for an experiment (default: 10)
    pub poll_interval_secs: u64,
    /// Per-request HTTP timeout (default: 30)
    pub request_timeout_secs: u64,
    /// Searcher metric source used when ranking without an explicit metric.
    pub metric_source: MetricSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            master: "http://localhost:8080".to_string(),
            token: None,
            poll_interval_secs: 10,
            request_timeout_secs: 30,
            metric_source: MetricSource::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(master: impl Into<String>) -> Self {
        Self {
            master: master.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_metric_source(mut self, source: MetricSource) -> Self {
        self.metric_source = source;
        self
    }

    /// Load from an optional YAML file, then apply `EXPCLIENT_*` variables.
    ///
    /// Not validated here: callers may still override fields, and
    /// [`Client::new`](crate::Client::new) validates the final result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => load_yaml(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from environment lookups. Takes the lookup as a
    /// closure so tests don't have to touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(master) = lookup(ENV_MASTER).filter(|m| !m.is_empty()) {
            self.master = master;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.master.trim().is_empty() {
            return Err(ClientError::Config("master address is empty".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ClientError::Config("poll_interval_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Master address with a scheme and without a trailing slash.
    pub fn master_url(&self) -> String {
        let addr = self.master.trim().trim_end_matches('/');
        if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn load_yaml(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        return Err(ClientError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(ClientConfig::default());
    }
    Ok(serde_yaml::from_str(&content)?)
}
