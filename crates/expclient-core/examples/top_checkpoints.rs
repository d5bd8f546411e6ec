//! Submit an experiment, wait for it, and print its best checkpoints.
//!
//! cargo run -p expclient-core --example top_checkpoints -- <master> <config.yaml> <context_dir>

use std::path::PathBuf;

use expclient_core::telemetry::{init_tracing, TracingOptions};
use expclient_core::{Client, ClientConfig, ExperimentConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = init_tracing(TracingOptions::default())?;

    let mut args = std::env::args().skip(1);
    let master = args.next().unwrap_or_else(|| "localhost:8080".to_string());
    let config_path = PathBuf::from(args.next().unwrap_or_else(|| "const.yaml".to_string()));
    let context_dir = PathBuf::from(args.next().unwrap_or_else(|| "model_def".to_string()));

    // 1. Connect and submit
    let client = Client::new(ClientConfig::new(master))?;
    let config = ExperimentConfig::from_yaml_file(&config_path)?;
    let mut experiment = client.create_experiment(&config, &context_dir).await?;
    println!("Submitted {}", experiment);

    // 2. Wait for a terminal state
    experiment.await_completion(client.wait_options()).await?;
    if !experiment.is_successful() {
        println!("{} did not complete successfully", experiment);
        std::process::exit(1);
    }

    // 3. Best checkpoint per trial, by the searcher metric
    for (rank, ckpt) in experiment
        .top_n_checkpoints(3, None, None)
        .await?
        .iter()
        .enumerate()
    {
        println!("#{} trial {} checkpoint {}", rank + 1, ckpt.trial_id, ckpt.uuid);
    }
    Ok(())
}
