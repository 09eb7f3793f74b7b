//! Implementation of the `stagebuild run` command.
//!
//! Starts the pipeline worker and wires the terminal to its control signal:
//! Ctrl-C or `q` cancels, `p` toggles pause. Stage transitions are printed
//! as they happen; everything else goes through the log.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::debug;

use stagebuild_lib::stage::StageState;
use stagebuild_lib::{Config, ControlSignal, Pipeline, PipelineOutcome, PipelineState, SetupMode};

use crate::output::{Status, format_duration, format_progress, print_field, print_status};

/// Exit status after a cancelled run, as for SIGINT.
const EXIT_CANCELLED: u8 = 130;

/// Execute the run command.
///
/// Loads the config, installs logging at the configured level, and blocks
/// until the pipeline finishes. A failed stage is returned as an error.
pub fn cmd_run(config_path: &Path, mode: SetupMode, verbose: bool) -> Result<ExitCode> {
  let config =
    Config::load(config_path).with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
  crate::init_tracing(verbose, config.log_level());
  debug!(path = %config_path.display(), stages = config.stages().len(), "config loaded");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(run(&config, mode));
  // The stdin reader may still be parked in a blocking read.
  rt.shutdown_background();

  result
}

async fn run(config: &Config, mode: SetupMode) -> Result<ExitCode> {
  let start = Instant::now();
  let ctx = config.build_context();
  let bin_dir = ctx.bin_dir();

  let handle = Pipeline::new(ctx, config.stages().to_vec())
    .mode(mode)
    .start()
    .context("Failed to start setup")?;

  print_status(Status::Info, "Type 'p' + Enter to pause or resume, 'q' + Enter or Ctrl-C to cancel");

  let watchers = [
    tokio::spawn(cancel_on_interrupt(handle.control())),
    tokio::spawn(read_controls(handle.control())),
    tokio::spawn(print_progress(handle.state())),
  ];

  let outcome = handle.join().await.context("Setup worker failed")?;
  for watcher in &watchers {
    watcher.abort();
  }

  println!();
  match outcome {
    PipelineOutcome::Completed => {
      print_status(Status::Success, "Setup complete!");
      print_field("Binaries", &bin_dir.display().to_string());
      print_field("Duration", &format_duration(start.elapsed()));
      print_status(Status::Info, &format!("Add '{}' to your PATH", bin_dir.display()));
      Ok(ExitCode::SUCCESS)
    }
    PipelineOutcome::Cancelled => {
      print_status(Status::Warning, "Setup cancelled");
      Ok(ExitCode::from(EXIT_CANCELLED))
    }
    PipelineOutcome::Failed(e) => {
      print_status(Status::Error, &format!("Setup failed at stage '{}' ({})", e.key(), e.phase()));
      Err(e).context("Setup failed; see the log above for details")
    }
  }
}

async fn cancel_on_interrupt(control: Arc<ControlSignal>) {
  if tokio::signal::ctrl_c().await.is_ok() {
    print_status(Status::Warning, "Interrupted, cancelling...");
    control.request_cancel();
  }
}

async fn read_controls(control: Arc<ControlSignal>) {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  while let Ok(Some(line)) = lines.next_line().await {
    match line.trim() {
      "p" => {
        if control.toggle_pause() {
          print_status(Status::Warning, "Paused, type 'p' to resume");
        } else {
          print_status(Status::Info, "Resumed");
        }
      }
      "q" => {
        print_status(Status::Warning, "Cancelling...");
        control.request_cancel();
      }
      "" => {}
      other => print_status(Status::Warning, &format!("Unknown command '{other}' (p = pause/resume, q = cancel)")),
    }
  }
}

async fn print_progress(mut state: watch::Receiver<PipelineState>) {
  while state.changed().await.is_ok() {
    let PipelineState::Running {
      key,
      index,
      total,
      stage,
    } = state.borrow_and_update().clone()
    else {
      continue;
    };

    let action = match stage {
      StageState::Fetching => "fetching",
      StageState::Extracting => "extracting",
      StageState::Building => "building",
      _ => continue,
    };
    print_status(Status::Info, &format_progress(index, total, &key, action));
  }
}
