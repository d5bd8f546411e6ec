//! Tracing setup shared by the CLI and by applications embedding the SDK.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Default)]
pub struct TracingOptions {
    /// Filter used when `RUST_LOG` is unset (default: "info")
    pub default_filter: Option<String>,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
    /// Also append logs to this file through a non-blocking writer.
    pub log_file: Option<PathBuf>,
}

/// Install the global subscriber. Keep the returned guard alive for as long
/// as file logging should keep flushing.
pub fn init_tracing(opts: TracingOptions) -> Result<Option<WorkerGuard>> {
    let default = opts.default_filter.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let (file_writer, guard) = match &opts.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .ok_or_else(|| ClientError::Config(format!("bad log file: {}", path.display())))?;
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match (opts.json, file_writer) {
        (true, Some(file)) => builder
            .json()
            .with_writer(std::io::stderr.and(file))
            .try_init(),
        (true, None) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, Some(file)) => builder
            .compact()
            .with_writer(std::io::stderr.and(file))
            .try_init(),
        (false, None) => builder.compact().with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| ClientError::Config(format!("tracing already initialized: {e}")))?;
    Ok(guard)
}
