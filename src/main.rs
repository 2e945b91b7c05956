mod app;
mod cache;
mod commands;
mod config;
mod erp;
mod ess;
mod logging;
mod storage;
mod tz;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ess")]
#[command(about = "Employee self-service for Odoo-compatible ERP servers")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./ess.yaml, then $XDG_CONFIG_HOME/ess/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Path to the session database (default: storage.path or $XDG_DATA_HOME/ess/state.db)
  #[arg(long, global = true)]
  state: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.verbose)?;

  let config = config::Config::load(args.config.as_deref())?;
  let app = app::App::new(&config, args.state.as_deref())?;

  commands::run(args.command, app.service()).await
}
