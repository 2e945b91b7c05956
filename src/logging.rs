//! Log setup. Stdout carries command output, so logs go to a daily file.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "ess.log";

/// `$XDG_DATA_HOME/ess/logs`
pub fn log_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|dir| dir.join("ess").join("logs"))
    .ok_or_else(|| eyre!("Could not determine data directory for logs"))
}

fn default_directive(verbose: bool) -> &'static str {
  if verbose {
    "ess=debug"
  } else {
    "ess=info"
  }
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
///
/// Keep the returned guard alive for the whole run or buffered lines are lost.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialise logging: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn verbose_raises_the_crate_level() {
    assert_eq!(default_directive(false), "ess=info");
    assert_eq!(default_directive(true), "ess=debug");
    assert!(EnvFilter::try_new(default_directive(true)).is_ok());
  }
}
