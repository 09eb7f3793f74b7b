mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use stagebuild_lib::SetupMode;
use stagebuild_lib::paths;

use cmd::{cmd_clean, cmd_init, cmd_run, cmd_uninstall};

/// stagebuild - fetch, cache, and build a fixed sequence of native dependencies
#[derive(Parser)]
#[command(name = "stagebuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output (build command output is logged at debug level)
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the config file (default: $STAGEBUILD_CONFIG or the XDG config dir)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run every configured stage
  Run {
    /// What to do with the existing build cache
    #[arg(long, value_enum, default_value_t = Mode::Last)]
    mode: Mode,
  },

  /// Write the default configuration file
  Init {
    /// Overwrite an existing config file
    #[arg(short, long)]
    force: bool,
  },

  /// Clear the build cache
  Clean {
    /// Also remove downloaded archives
    #[arg(long)]
    downloads: bool,
  },

  /// Remove installed files and the configuration directory
  Uninstall,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
  /// Keep the build cache from the previous run
  Last,
  /// Clear the build cache first (downloads are kept)
  Default,
}

impl From<Mode> for SetupMode {
  fn from(mode: Mode) -> Self {
    match mode {
      Mode::Last => SetupMode::Last,
      Mode::Default => SetupMode::Default,
    }
  }
}

/// Install the log subscriber. `RUST_LOG` wins, then `-v`, then `level`.
pub(crate) fn init_tracing(verbose: bool, level: &str) {
  let level = if verbose { "debug" } else { level };
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(format!("warn,stagebuild_lib={level},stagebuild={level}")));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();
  let config = cli.config.unwrap_or_else(paths::config_file);

  match cli.command {
    Commands::Run { mode } => cmd_run(&config, mode.into(), cli.verbose),
    Commands::Init { force } => {
      init_tracing(cli.verbose, "info");
      cmd_init(&config, force)?;
      Ok(ExitCode::SUCCESS)
    }
    Commands::Clean { downloads } => {
      init_tracing(cli.verbose, "info");
      cmd_clean(&config, downloads)?;
      Ok(ExitCode::SUCCESS)
    }
    Commands::Uninstall => {
      init_tracing(cli.verbose, "info");
      cmd_uninstall(&config)?;
      Ok(ExitCode::SUCCESS)
    }
  }
}
