use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "storesync=info";
const FILE_FILTER: &str = "warn,storesync=debug";

/// Where logs and the default database live: $XDG_DATA_HOME/storesync.
pub fn data_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|dir| dir.join("storesync"))
}

/// Install the global subscriber.
///
/// Human-readable output goes to stderr, and a daily-rolling file under
/// `<data_dir>/logs` gets this crate's debug output. `RUST_LOG`
/// overrides the stderr filter. Keep the returned guard alive for the life
/// of the process or buffered file output is lost.
pub fn init(data_dir: &Path) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (non_blocking, guard) = tracing_appender::non_blocking(rolling::daily(&log_dir, "storesync.log"));

  let console_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  tracing_subscriber::registry()
    .with(
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter),
    )
    .with(
      fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::new(FILE_FILTER)),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
