//! Integration tests for expclient-core against an in-memory master.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::time::Instant;
use uuid::Uuid;

use expclient_core::api::CreateExperimentRequest;
use expclient_core::{
    CancellationToken, CheckpointFilter, CheckpointRecord, CheckpointState, Client, ClientConfig,
    ClientError, ExperimentApi, ExperimentConfig, ExperimentHandle, ExperimentSnapshot,
    ExperimentState, MetricSource, Result, WaitOptions,
};

const EXP_ID: i64 = 1;

struct MockMaster {
    state: Mutex<ExperimentState>,
    config: ExperimentConfig,
    checkpoints: Vec<CheckpointRecord>,
    reject_create: bool,
    reject_patch: bool,
    created: Mutex<Vec<CreateExperimentRequest>>,
    get_calls: AtomicUsize,
}

impl MockMaster {
    fn new(state: ExperimentState) -> Self {
        Self {
            state: Mutex::new(state),
            config: json!({"searcher": {"metric": "validation_loss", "smaller_is_better": true}})
                .into(),
            checkpoints: vec![],
            reject_create: false,
            reject_patch: false,
            created: Mutex::new(vec![]),
            get_calls: AtomicUsize::new(0),
        }
    }

    fn with_checkpoints(mut self, checkpoints: Vec<CheckpointRecord>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config.into();
        self
    }

    fn set_state(&self, state: ExperimentState) {
        *self.state.lock().unwrap() = state;
    }

    fn snapshot(&self) -> ExperimentSnapshot {
        ExperimentSnapshot {
            id: EXP_ID,
            state: *self.state.lock().unwrap(),
            description: Some("mnist_pytorch_const".into()),
            config: self.config.clone(),
        }
    }
}

#[async_trait]
impl ExperimentApi for MockMaster {
    fn master(&self) -> &str {
        "http://mock:8080"
    }

    async fn create_experiment(
        &self,
        request: &CreateExperimentRequest,
    ) -> Result<ExperimentSnapshot> {
        if self.reject_create {
            return Err(ClientError::Api {
                status: 400,
                message: "invalid experiment config".into(),
            });
        }
        self.created.lock().unwrap().push(request.clone());
        self.set_state(ExperimentState::Paused);
        Ok(self.snapshot())
    }

    async fn get_experiment(&self, id: i64) -> Result<ExperimentSnapshot> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if id != EXP_ID {
            return Err(ClientError::NotFound(id));
        }
        Ok(self.snapshot())
    }

    async fn patch_experiment_state(
        &self,
        id: i64,
        state: ExperimentState,
    ) -> Result<ExperimentSnapshot> {
        if id != EXP_ID {
            return Err(ClientError::NotFound(id));
        }
        if self.reject_patch {
            return Err(ClientError::Api {
                status: 409,
                message: "experiment is terminal".into(),
            });
        }
        self.set_state(state);
        Ok(self.snapshot())
    }

    async fn list_checkpoints(
        &self,
        _id: i64,
        filter: &CheckpointFilter,
    ) -> Result<Vec<CheckpointRecord>> {
        Ok(self
            .checkpoints
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }
}

fn ckpt(trial_id: i64, metrics: serde_json::Value) -> CheckpointRecord {
    CheckpointRecord {
        uuid: Uuid::new_v4(),
        trial_id,
        batch_number: Some(100),
        state: CheckpointState::Completed,
        validation_state: CheckpointState::Completed,
        validation_metrics: serde_json::from_value(metrics).unwrap(),
        experiment_config: json!({"searcher": {"metric": "m", "smaller_is_better": true}}).into(),
    }
}

async fn handle_for(master: MockMaster) -> (Arc<MockMaster>, ExperimentHandle) {
    let master = Arc::new(master);
    let handle = ExperimentHandle::fetch(master.clone(), EXP_ID).await.unwrap();
    (master, handle)
}

fn trial_metrics(out: &[CheckpointRecord], metric: &str) -> Vec<(i64, f64)> {
    out.iter()
        .map(|c| (c.trial_id, c.metric(metric).unwrap()))
        .collect()
}

#[tokio::test]
async fn test_top_n_scenario_smaller_is_better() {
    let master = MockMaster::new(ExperimentState::Completed).with_checkpoints(vec![
        ckpt(1, json!({"m": 0.5})),
        ckpt(1, json!({"m": 0.3})),
        ckpt(2, json!({"m": 0.4})),
    ]);
    let (_, handle) = handle_for(master).await;

    let top = handle.top_n_checkpoints(2, Some("m"), Some(true)).await.unwrap();
    assert_eq!(trial_metrics(&top, "m"), vec![(1, 0.3), (2, 0.4)]);
}

#[tokio::test]
async fn test_top_checkpoint_is_first_of_top_n() {
    let master = MockMaster::new(ExperimentState::Completed).with_checkpoints(vec![
        ckpt(3, json!({"m": 0.7})),
        ckpt(4, json!({"m": 0.2})),
        ckpt(5, json!({"m": 0.9})),
    ]);
    let (_, handle) = handle_for(master).await;

    let best = handle.top_checkpoint(None, None).await.unwrap();
    let top = handle.top_n_checkpoints(1, None, None).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(best, top[0]);
    assert_eq!(best.trial_id, 4);
}

#[tokio::test]
async fn test_only_completed_validations_are_ranked() {
    let mut unvalidated = ckpt(9, json!({"m": 0.0}));
    unvalidated.validation_state = CheckpointState::Active;
    let master = MockMaster::new(ExperimentState::Completed)
        .with_checkpoints(vec![unvalidated, ckpt(2, json!({"m": 0.5}))]);
    let (_, handle) = handle_for(master).await;

    let best = handle.top_checkpoint(Some("m"), Some(true)).await.unwrap();
    assert_eq!(best.trial_id, 2);
}

#[tokio::test]
async fn test_no_checkpoints() {
    let (_, handle) = handle_for(MockMaster::new(ExperimentState::Completed)).await;

    let err = handle.top_n_checkpoints(5, None, None).await.unwrap_err();
    assert!(matches!(err, ClientError::NoCheckpoints(EXP_ID)));
    let err = handle.top_checkpoint(None, None).await.unwrap_err();
    assert!(matches!(err, ClientError::NoCheckpoints(EXP_ID)));
}

#[tokio::test]
async fn test_missing_metric_fails_ranking() {
    let master = MockMaster::new(ExperimentState::Completed)
        .with_checkpoints(vec![ckpt(1, json!({"m": 0.1})), ckpt(2, json!({"other": 0.2}))]);
    let (_, handle) = handle_for(master).await;

    let err = handle.top_checkpoint(None, None).await.unwrap_err();
    assert!(matches!(err, ClientError::MissingMetric { ref metric, .. } if metric == "m"));
}

#[tokio::test]
async fn test_explicit_metric_sorts_descending_by_default() {
    let master = MockMaster::new(ExperimentState::Completed).with_checkpoints(vec![
        ckpt(1, json!({"m": 0.1, "accuracy": 0.80})),
        ckpt(2, json!({"m": 0.2, "accuracy": 0.95})),
        ckpt(3, json!({"m": 0.3, "accuracy": 0.60})),
    ]);
    let (_, handle) = handle_for(master).await;

    let top = handle.top_n_checkpoints(3, Some("accuracy"), None).await.unwrap();
    assert_eq!(
        trial_metrics(&top, "accuracy"),
        vec![(2, 0.95), (1, 0.80), (3, 0.60)]
    );
}

#[tokio::test]
async fn test_metric_source_selects_config() {
    let checkpoints = vec![
        ckpt(1, json!({"m": 0.1, "accuracy": 0.5})),
        ckpt(2, json!({"m": 0.9, "accuracy": 0.7})),
    ];
    let master = MockMaster::new(ExperimentState::Completed)
        .with_config(json!({"searcher": {"metric": "accuracy", "smaller_is_better": false}}))
        .with_checkpoints(checkpoints);
    let (_, handle) = handle_for(master).await;

    // checkpoint-embedded config: minimize "m"
    let best = handle.top_checkpoint(None, Some(false)).await.unwrap();
    assert_eq!(best.trial_id, 1);

    // handle's own config: maximize "accuracy"
    let handle = handle.with_metric_source(MetricSource::ExperimentConfig);
    let best = handle.top_checkpoint(None, None).await.unwrap();
    assert_eq!(best.trial_id, 2);
}

#[tokio::test]
async fn test_fetch_unknown_experiment() {
    let master: Arc<dyn ExperimentApi> = Arc::new(MockMaster::new(ExperimentState::Active));
    let err = ExperimentHandle::fetch(master, 42).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(42)));
}

#[tokio::test]
async fn test_is_successful_uses_cached_state() {
    let (master, mut handle) = handle_for(MockMaster::new(ExperimentState::Active)).await;
    assert!(!handle.is_successful());

    master.set_state(ExperimentState::Completed);
    assert!(!handle.is_successful());

    handle.refresh().await.unwrap();
    assert!(handle.is_successful());
}

#[tokio::test]
async fn test_create_submits_yaml_and_activates() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("model_def.py"), "class MNistTrial: pass\n").unwrap();
    let master = Arc::new(MockMaster::new(ExperimentState::Unspecified));
    let client = Client::with_api(ClientConfig::default(), master.clone());

    let config = ExperimentConfig::from_yaml_str(
        "description: mnist_pytorch_const\nsearcher:\n  name: single\n  metric: validation_loss\n  smaller_is_better: true\nentrypoint: model_def:MNistTrial\n",
    )
    .unwrap();
    let handle = client.create_experiment(&config, tmp.path()).await.unwrap();

    assert_eq!(handle.id(), EXP_ID);
    assert_eq!(handle.state(), ExperimentState::Active);
    assert_eq!(handle.to_string(), "Experiment(id=1)");

    let created = master.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert!(!created[0].validate_only);
    assert!(created[0].experiment_config.contains("metric: validation_loss"));
    assert_eq!(created[0].model_definition.len(), 1);
    assert_eq!(created[0].model_definition[0].path, "model_def.py");
}

#[tokio::test]
async fn test_create_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut master = MockMaster::new(ExperimentState::Unspecified);
    master.reject_create = true;
    let client = Client::with_api(ClientConfig::default(), Arc::new(master));

    let err = client
        .create_experiment(&ExperimentConfig::default(), tmp.path())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Creation(ref msg) if msg.contains("invalid experiment config")));
}

#[tokio::test]
async fn test_activate_rejected() {
    let mut master = MockMaster::new(ExperimentState::Completed);
    master.reject_patch = true;
    let (_, mut handle) = handle_for(master).await;

    let err = handle.activate().await.unwrap_err();
    assert!(matches!(err, ClientError::Activation(_)));
    assert_eq!(handle.state(), ExperimentState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_await_completion_returns_within_one_interval() {
    let (master, mut handle) = handle_for(MockMaster::new(ExperimentState::Active)).await;

    let updater = master.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        updater.set_state(ExperimentState::Completed);
    });

    let start = Instant::now();
    let state = handle.await_completion(WaitOptions::default()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(state, ExperimentState::Completed);
    assert!(handle.is_successful());
    assert!(elapsed >= Duration::from_secs(25), "returned early: {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(35), "returned late: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_await_completion_non_active_returns_immediately() {
    let (master, mut handle) = handle_for(MockMaster::new(ExperimentState::Error)).await;
    let before = master.get_calls.load(Ordering::SeqCst);

    let state = handle.await_completion(WaitOptions::default()).await.unwrap();
    assert_eq!(state, ExperimentState::Error);
    assert!(!handle.is_successful());
    assert_eq!(master.get_calls.load(Ordering::SeqCst), before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_await_completion_times_out() {
    let (_, mut handle) = handle_for(MockMaster::new(ExperimentState::Active)).await;

    let opts = WaitOptions::default()
        .with_poll_interval(Duration::from_secs(1))
        .with_timeout(Duration::from_secs(5));
    let err = handle.await_completion(opts).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn test_await_completion_cancelled() {
    let (_, mut handle) = handle_for(MockMaster::new(ExperimentState::Active)).await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        trigger.cancel();
    });

    let err = handle
        .await_completion(WaitOptions::default().with_cancel(token))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
}
