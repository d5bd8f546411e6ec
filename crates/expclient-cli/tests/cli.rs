use assert_cmd::Command;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

const BEST_TRIAL_1: &str = "5f0c6a56-27a4-4d55-9d1b-0c3b9a1e0001";
const WORSE_TRIAL_1: &str = "5f0c6a56-27a4-4d55-9d1b-0c3b9a1e0002";
const BEST_TRIAL_2: &str = "5f0c6a56-27a4-4d55-9d1b-0c3b9a1e0003";
const TRIAL_3: &str = "5f0c6a56-27a4-4d55-9d1b-0c3b9a1e0004";

fn expc() -> Command {
    let mut cmd = Command::cargo_bin("expc").unwrap();
    cmd.env_remove("EXPCLIENT_MASTER")
        .env_remove("EXPCLIENT_TOKEN")
        .env_remove("EXPCLIENT_CONFIG")
        .env("RUST_LOG", "error");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    expc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("wait"))
        .stdout(predicate::str::contains("checkpoints"));
}

#[test]
fn test_checkpoints_rejects_conflicting_directions() {
    expc()
        .args(["checkpoints", "1", "--smaller-is-better", "--larger-is-better"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_describe_unreachable_master_fails() {
    expc()
        .args(["describe", "1", "--master", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HTTP error"));
}

#[test]
fn test_create_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    expc()
        .arg("create")
        .arg(tmp.path().join("missing.yaml"))
        .arg(tmp.path())
        .args(["--master", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.yaml"));
}

#[test]
fn test_bad_client_config_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("client.yaml");
    std::fs::write(&path, "poll_interval_secs: 0\n").unwrap();
    expc()
        .arg("--config")
        .arg(&path)
        .args(["describe", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll_interval_secs"));
}

// ─── Against a fake master ────────────────────────────────────────────────────

async fn get_experiment(Path(id): Path<i64>) -> impl IntoResponse {
    if id != 7 {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "not found"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "experiment": {"id": 7, "state": "STATE_ERROR"},
            "config": {"searcher": {"metric": "validation_loss", "smaller_is_better": true}}
        })),
    )
}

async fn list_checkpoints(Path(_id): Path<i64>) -> Json<Value> {
    let ckpt = |uuid: &str, trial: i64, loss: f64| {
        json!({
            "uuid": uuid,
            "trialId": trial,
            "batchNumber": 100,
            "state": "STATE_COMPLETED",
            "validationState": "STATE_COMPLETED",
            "metrics": {"validationMetrics": {"validation_loss": loss}},
            "experimentConfig": {"searcher": {"metric": "validation_loss", "smaller_is_better": true}}
        })
    };
    Json(json!({"checkpoints": [
        ckpt(WORSE_TRIAL_1, 1, 0.5),
        ckpt(BEST_TRIAL_1, 1, 0.25),
        ckpt(BEST_TRIAL_2, 2, 0.375),
        ckpt(TRIAL_3, 3, 0.875),
    ]}))
}

async fn spawn_master() -> String {
    let app = Router::new()
        .route("/api/v1/experiments/{id}", get(get_experiment))
        .route("/api/v1/experiments/{id}/checkpoints", get(list_checkpoints));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checkpoints_table() {
    let master = spawn_master().await;
    tokio::task::spawn_blocking(move || {
        expc()
            .args(["--master", &master, "checkpoints", "7", "--limit", "2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("validation_loss"))
            .stdout(predicate::str::contains(BEST_TRIAL_1))
            .stdout(predicate::str::contains(BEST_TRIAL_2))
            .stdout(predicate::str::contains(WORSE_TRIAL_1).not())
            .stdout(predicate::str::contains(TRIAL_3).not());
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checkpoints_json() {
    let master = spawn_master().await;
    let output = tokio::task::spawn_blocking(move || {
        expc()
            .args(["--master", &master, "checkpoints", "7", "-l", "5", "-f", "json"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success());
    let ranked: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    let order: Vec<_> = ranked.iter().map(|c| c["uuid"].as_str().unwrap()).collect();
    assert_eq!(order, vec![BEST_TRIAL_1, BEST_TRIAL_2, TRIAL_3]);
    assert_eq!(ranked[0]["trial_id"], json!(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_unsuccessful_exits_one_and_flushes_log_file() {
    let master = spawn_master().await;
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("expc.log");
    let log_arg = log.clone();

    tokio::task::spawn_blocking(move || {
        expc()
            .env("RUST_LOG", "info")
            .args(["--master", &master, "--json-logs", "--log-file"])
            .arg(&log_arg)
            .args(["wait", "7", "--interval", "1"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("did not complete successfully"));
    })
    .await
    .unwrap();

    let logged = std::fs::read_to_string(&log).unwrap();
    assert!(logged.contains("Experiment finished"));
    assert!(logged.contains("Did not complete successfully"));
}
