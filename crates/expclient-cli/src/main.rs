//! expc: command-line access to experiments on a remote master.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use expclient::telemetry::{init_tracing, TracingOptions};
use expclient::{
    CancellationToken, CheckpointRecord, Client, ClientConfig, ExperimentConfig,
    ExperimentHandle, MetricSource, RankingSpec, WaitOptions,
};

#[derive(Parser)]
#[command(
    name = "expc",
    about = "Create, watch and rank experiments on a remote master",
    version,
    author
)]
struct Cli {
    /// Client config file (YAML)
    #[arg(long, global = true, env = "EXPCLIENT_CONFIG")]
    config: Option<PathBuf>,
    /// Master address, overrides the config file and EXPCLIENT_MASTER
    #[arg(long, short, global = true)]
    master: Option<String>,
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an experiment config with its model definition and activate it
    Create {
        /// Experiment config (YAML)
        #[arg(value_name = "CONFIG")]
        experiment_config: PathBuf,
        /// Model definition directory
        context_dir: PathBuf,
        /// Block until the experiment leaves ACTIVE
        #[arg(long)]
        wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show an experiment's state and searcher settings
    Describe { id: i64 },
    /// Move an experiment to ACTIVE
    Activate { id: i64 },
    /// Block until an experiment leaves ACTIVE
    Wait {
        id: i64,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Seconds between state checks (default: from config)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// List the best checkpoints, one per trial
    Checkpoints {
        id: i64,
        /// Number of checkpoints to show
        #[arg(long, short, default_value_t = 1)]
        limit: usize,
        /// Validation metric to rank by (default: the searcher metric)
        #[arg(long)]
        sort_by: Option<String>,
        /// Rank the metric ascending
        #[arg(long, conflicts_with = "larger_is_better")]
        smaller_is_better: bool,
        /// Rank the metric descending
        #[arg(long)]
        larger_is_better: bool,
        /// Where the searcher metric is read from when --sort-by is not given
        #[arg(long, value_enum)]
        metric_source: Option<SourceArg>,
        /// Output format
        #[arg(long, short, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Checkpoint,
    Experiment,
}

impl From<SourceArg> for MetricSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Checkpoint => MetricSource::CheckpointConfig,
            SourceArg::Experiment => MetricSource::ExperimentConfig,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _guard = init_tracing(TracingOptions {
        default_filter: None,
        json: cli.json_logs,
        log_file: cli.log_file.clone(),
    })?;

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(master) = cli.master {
        config.master = master;
    }

    // Exit codes go through main so the log guard flushes first.
    let code = match cli.command {
        Commands::Create {
            experiment_config,
            context_dir,
            wait,
            timeout,
        } => cmd_create(config, experiment_config, context_dir, wait, timeout).await?,
        Commands::Describe { id } => {
            cmd_describe(config, id).await?;
            ExitCode::SUCCESS
        }
        Commands::Activate { id } => {
            cmd_activate(config, id).await?;
            ExitCode::SUCCESS
        }
        Commands::Wait {
            id,
            timeout,
            interval,
        } => cmd_wait(config, id, timeout, interval).await?,
        Commands::Checkpoints {
            id,
            limit,
            sort_by,
            smaller_is_better,
            larger_is_better,
            metric_source,
            format,
        } => {
            if let Some(source) = metric_source {
                config.metric_source = source.into();
            }
            let direction = match (smaller_is_better, larger_is_better) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd_checkpoints(config, id, limit, sort_by, direction, format).await?;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

// ─── Command implementations ──────────────────────────────────────────────────

async fn cmd_create(
    config: ClientConfig,
    experiment_config: PathBuf,
    context_dir: PathBuf,
    wait: bool,
    timeout: Option<u64>,
) -> Result<ExitCode> {
    let exp_config = ExperimentConfig::from_yaml_file(&experiment_config)
        .with_context(|| format!("reading {}", experiment_config.display()))?;
    let client = Client::new(config)?;

    let mut handle = client.create_experiment(&exp_config, &context_dir).await?;
    println!("Created experiment {} ({})", handle.id(), handle.state());

    if !wait {
        return Ok(ExitCode::SUCCESS);
    }
    let opts = wait_options(&client, timeout, None);
    finish_wait(&mut handle, opts).await
}

async fn cmd_describe(config: ClientConfig, id: i64) -> Result<()> {
    let client = Client::new(config)?;
    let handle = client.get_experiment(id).await?;

    println!("Experiment: {}", handle.id());
    println!("Master: {}", handle.master());
    println!("State: {}", handle.state());
    if let Some(desc) = handle.description() {
        println!("Description: {}", desc);
    }
    match handle.config().searcher() {
        Some(searcher) => println!(
            "Searcher metric: {} ({})",
            searcher.metric,
            if searcher.smaller_is_better {
                "smaller is better"
            } else {
                "larger is better"
            }
        ),
        None => println!("Searcher metric: -"),
    }
    Ok(())
}

async fn cmd_activate(config: ClientConfig, id: i64) -> Result<()> {
    let client = Client::new(config)?;
    let mut handle = client.get_experiment(id).await?;
    handle.activate().await?;
    println!("Experiment {} is {}", handle.id(), handle.state());
    Ok(())
}

async fn cmd_wait(
    config: ClientConfig,
    id: i64,
    timeout: Option<u64>,
    interval: Option<u64>,
) -> Result<ExitCode> {
    let client = Client::new(config)?;
    let mut handle = client.get_experiment(id).await?;
    let opts = wait_options(&client, timeout, interval);
    finish_wait(&mut handle, opts).await
}

async fn cmd_checkpoints(
    config: ClientConfig,
    id: i64,
    limit: usize,
    sort_by: Option<String>,
    smaller_is_better: Option<bool>,
    format: OutputFormat,
) -> Result<()> {
    let client = Client::new(config)?;
    let handle = client.get_experiment(id).await?;
    let checkpoints = handle
        .top_n_checkpoints(limit, sort_by.as_deref(), smaller_is_better)
        .await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    let metric = sort_by.or_else(|| ranked_metric(&handle, &checkpoints));
    let metric_header = metric.clone().unwrap_or_else(|| "metric".to_string());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Rank", "Trial", "Batch", "UUID", metric_header.as_str()]);
    for (rank, ckpt) in checkpoints.iter().enumerate() {
        let value = metric
            .as_deref()
            .and_then(|m| ckpt.metric(m))
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row([
            (rank + 1).to_string(),
            ckpt.trial_id.to_string(),
            ckpt.batch_number
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            ckpt.uuid.to_string(),
            value,
        ]);
    }

    println!("Experiment: {}", handle.id());
    println!("{}", table);
    Ok(())
}

// ─── Utilities ────────────────────────────────────────────────────────────────

fn wait_options(client: &Client, timeout: Option<u64>, interval: Option<u64>) -> WaitOptions {
    let mut opts = client.wait_options();
    if let Some(secs) = interval {
        opts = opts.with_poll_interval(Duration::from_secs(secs.max(1)));
    }
    if let Some(secs) = timeout {
        opts = opts.with_timeout(Duration::from_secs(secs));
    }

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    opts.with_cancel(token)
}

/// Wait with a spinner. Fails the exit code unless the experiment completed.
async fn finish_wait(handle: &mut ExperimentHandle, opts: WaitOptions) -> Result<ExitCode> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")?);
    spinner.set_message(format!("Waiting for experiment {}", handle.id()));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = handle.await_completion(opts).await;
    spinner.finish_and_clear();
    let state = result?;

    if !handle.is_successful() {
        warn!(experiment = handle.id(), %state, "Did not complete successfully");
        println!("Experiment {} did not complete successfully ({})", handle.id(), state);
        return Ok(ExitCode::FAILURE);
    }
    info!(experiment = handle.id(), "Completed");
    println!("Experiment {} completed successfully", handle.id());
    Ok(ExitCode::SUCCESS)
}

/// The searcher metric the ranking would have used, for the table header.
fn ranked_metric(handle: &ExperimentHandle, checkpoints: &[CheckpointRecord]) -> Option<String> {
    RankingSpec::resolve(
        None,
        None,
        handle.metric_source(),
        handle.config(),
        checkpoints,
    )
    .ok()
    .map(|spec| spec.metric)
}
