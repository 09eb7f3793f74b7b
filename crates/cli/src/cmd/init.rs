//! Implementation of the `stagebuild init` command.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use stagebuild_lib::Config;

use crate::output::Status;

/// Write the default configuration (openssl, libevent, shadow resources,
/// shadow) to `path`.
///
/// # Errors
///
/// Returns an error if the file exists and `force` is not set, or if it
/// cannot be written.
pub fn cmd_init(path: &Path, force: bool) -> Result<()> {
  Config::write_default(path, force).context("Failed to write default configuration")?;

  println!(
    "{} {}",
    Status::Success.marker().green(),
    "Wrote default stagebuild configuration!".green().bold()
  );
  println!();
  println!("  {} Config file: {}", Status::Info.marker().cyan(), path.display());
  println!();
  println!("{}", "Next steps:".bold());
  println!(
    "  1. Edit {} to set the install prefix and stages",
    path.display().to_string().cyan()
  );
  println!("  2. Run: {}", "stagebuild run".cyan());

  Ok(())
}
