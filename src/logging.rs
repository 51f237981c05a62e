use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Environment;

const LOG_FILE: &str = "pulseboard.log";

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(environment: Environment) -> &'static str {
  if environment.is_development() {
    "pulseboard=debug"
  } else {
    "warn"
  }
}

/// Install the global subscriber: a daily-rolling file in `log_dir`, plus
/// stderr in development. The returned guard flushes the file writer and
/// must live as long as the process logs.
pub fn init(environment: Environment, log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE));

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_directive(environment)));

  let file_layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
  let stderr_layer = environment
    .is_development()
    .then(|| fmt::layer().with_writer(std::io::stderr).compact());

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
